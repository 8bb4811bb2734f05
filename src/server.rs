use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::notifier::{NotificationRequest, Notifier, NotifyError};
use crate::resolver::{self, ResolvedIdentity};

pub struct AppState {
    pub notifier: Notifier,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error_body(status, &self.to_string())
    }
}

/// Turn a handler panic into a JSON 500 with a route-specific message.
fn panic_response(
    message: &'static str,
) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone + Send + Sync + 'static {
    move |payload: Box<dyn Any + Send + 'static>| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(panic = %detail, "{}", message);
        error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/get-ip",
            get(get_ip).layer(CatchPanicLayer::custom(panic_response("Failed to get IP address"))),
        )
        .route(
            "/api/send-telegram",
            post(send_telegram)
                .layer(CatchPanicLayer::custom(panic_response("Failed to send to Telegram"))),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_ip(headers: HeaderMap) -> Json<ResolvedIdentity> {
    Json(resolver::resolve(&headers))
}

async fn send_telegram(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, NotifyError> {
    let body: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Notification body is not JSON");
        NotifyError::MalformedBody
    })?;
    let req = NotificationRequest::from_json(&body)?;
    state.notifier.notify(&req).await?;
    Ok(Json(json!({ "success": true })))
}

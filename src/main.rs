mod config;
mod geo;
mod notifier;
mod resolver;
mod server;
mod telegram;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use config::{Config, Credentials};
use geo::GeoClient;
use notifier::Notifier;
use server::AppState;
use telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ip_relay=info,tower_http=info")),
        )
        .init();

    let config = Config::load().context("Failed to load config")?;

    let geo = GeoClient::new(config.geo.base_url.clone(), config.geo.timeout())?;
    let telegram = match Credentials::from_env() {
        Some(credentials) => Some(TelegramClient::new(config.telegram.api_base.clone(), credentials)?),
        None => {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set, notifications will fail");
            None
        }
    };
    let state = Arc::new(AppState {
        notifier: Notifier::new(geo, telegram),
    });
    let app = server::router(state);

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(
        bind_addr = %config.server.bind_addr,
        geo_base_url = %config.geo.base_url,
        geo_timeout_ms = config.geo.timeout_ms,
        "Starting IP relay"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

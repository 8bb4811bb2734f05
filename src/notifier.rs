use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::geo::{GeoClient, GeoInfo};
use crate::telegram::markdown::escape;
use crate::telegram::{Attempt, TelegramClient, TelegramError};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The body is not JSON at all; treated as an internal fault.
    #[error("Failed to send to Telegram")]
    MalformedBody,
    #[error("Invalid IP address")]
    InvalidIp,
    #[error("Invalid User Agent")]
    InvalidUserAgent,
    #[error("Invalid timestamp")]
    InvalidTimestamp,
    #[error("Telegram configuration missing")]
    MissingConfig,
    #[error("Failed to send to Telegram")]
    Delivery(#[source] TelegramError),
}

impl NotifyError {
    /// Errors caused by the caller's input, as opposed to service faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            NotifyError::InvalidIp
                | NotifyError::InvalidUserAgent
                | NotifyError::InvalidTimestamp
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub ip: String,
    pub user_agent: String,
    pub timestamp: String,
}

fn required_str(body: &Value, field: &str, err: NotifyError) -> Result<String, NotifyError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(err)
}

impl NotificationRequest {
    /// Validate `{ip, userAgent, timestamp}`; each must be a non-empty string.
    /// A body that is not an object has no `ip` and fails on it first.
    pub fn from_json(body: &Value) -> Result<Self, NotifyError> {
        Ok(Self {
            ip: required_str(body, "ip", NotifyError::InvalidIp)?,
            user_agent: required_str(body, "userAgent", NotifyError::InvalidUserAgent)?,
            timestamp: required_str(body, "timestamp", NotifyError::InvalidTimestamp)?,
        })
    }
}

/// ISO-8601 layouts with an explicit offset (`Z` is normalized to `+00:00`).
const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%dT%H:%M%:z",
];

/// ISO-8601 layouts without an offset; read as UTC.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let with_offset = match s.strip_suffix(|c: char| c == 'Z' || c == 'z') {
        Some(rest) => format!("{}+00:00", rest),
        None => s.to_string(),
    };
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Render an ISO-8601 instant as `DD/MM/YYYY HH:MM:SS UTC+7`.
///
/// The shift is a flat seven hours; no timezone rules are consulted.
/// Unparsable input is returned unchanged.
pub fn format_utc7(timestamp: &str) -> String {
    match parse_timestamp(timestamp) {
        Some(utc) => (utc + Duration::hours(7))
            .format("%d/%m/%Y %H:%M:%S UTC+7")
            .to_string(),
        None => {
            warn!(timestamp = %timestamp, "Unparsable timestamp, passing through");
            timestamp.to_string()
        }
    }
}

/// Compose the Markdown alert. Every interpolated field except the IP is escaped.
pub fn compose_message(ip: &str, user_agent: &str, formatted_time: &str, geo: &GeoInfo) -> String {
    let mut msg = String::from("🔍 **IP Tracker Alert**\n\n");
    msg.push_str(&format!("📍 **IP Address:** `{}`\n", ip));
    if !geo.country_text.is_empty() {
        msg.push_str(&format!("🌎 **Country:** {}\n", escape(&geo.country_text)));
    }
    if !geo.isp_text.is_empty() {
        msg.push_str(&format!("🏷 **ISP:** {}\n", escape(&geo.isp_text)));
    }
    msg.push_str(&format!("🕐 **Time:** {}\n", escape(formatted_time)));
    msg.push_str(&format!("📱 **User Agent:** {}", escape(user_agent)));
    msg
}

/// Formats and delivers IP alerts. Holds no per-request state.
#[derive(Clone)]
pub struct Notifier {
    geo: GeoClient,
    telegram: Option<TelegramClient>,
}

impl Notifier {
    /// `telegram` is `None` when bot credentials are not configured; every
    /// notification then fails with [`NotifyError::MissingConfig`].
    pub fn new(geo: GeoClient, telegram: Option<TelegramClient>) -> Self {
        Self { geo, telegram }
    }

    pub async fn notify(&self, req: &NotificationRequest) -> Result<Attempt, NotifyError> {
        let telegram = self.telegram.as_ref().ok_or(NotifyError::MissingConfig)?;

        let formatted_time = format_utc7(&req.timestamp);
        let geo = self.geo.lookup(&req.ip).await;
        let message = compose_message(&req.ip, &req.user_agent, &formatted_time, &geo);

        let attempt = telegram.deliver(&message).await.map_err(|e| {
            warn!(ip = %req.ip, error = %e, "Telegram delivery failed");
            NotifyError::Delivery(e)
        })?;
        info!(
            ip = %req.ip,
            ?attempt,
            enriched = !geo.country_text.is_empty() || !geo.isp_text.is_empty(),
            "Alert delivered"
        );
        Ok(attempt)
    }
}

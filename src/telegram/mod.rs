pub mod markdown;
pub mod types;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Credentials;
use types::{ApiErrorBody, SendMessageRequest};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Transport(reqwest::Error),
    #[error("Telegram API returned {status}: {description}")]
    Api {
        status: StatusCode,
        error_code: Option<i64>,
        description: String,
    },
}

impl From<reqwest::Error> for TelegramError {
    // The request URL carries the bot token; keep it out of messages and logs.
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Transport(e.without_url())
    }
}

impl TelegramError {
    /// The Bot API could not parse the Markdown entities in the text.
    pub fn is_entity_parse(&self) -> bool {
        matches!(
            self,
            TelegramError::Api { error_code: Some(400), description, .. }
                if description.contains("parse entities")
        )
    }
}

/// Which form of the message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Markdown parse mode, message as composed.
    Rich,
    /// No parse mode, emphasis and code markers removed.
    Plain,
}

impl Attempt {
    fn parse_mode(self) -> Option<&'static str> {
        match self {
            Attempt::Rich => Some("Markdown"),
            Attempt::Plain => None,
        }
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    api_base: String,
    credentials: Credentials,
}

impl TelegramClient {
    pub fn new(api_base: String, credentials: Credentials) -> Result<Self> {
        // No request timeout: delivery relies on the transport defaults.
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn send(&self, attempt: Attempt, text: &str) -> Result<(), TelegramError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.credentials.bot_token);
        let body = SendMessageRequest {
            chat_id: &self.credentials.chat_id,
            text,
            parse_mode: attempt.parse_mode(),
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            debug!(?attempt, "Telegram message sent");
            return Ok(());
        }

        let raw = resp.text().await.unwrap_or_default();
        let (error_code, description) = match serde_json::from_str::<ApiErrorBody>(&raw) {
            Ok(err) => (err.error_code, err.description),
            Err(_) => (None, raw),
        };
        Err(TelegramError::Api {
            status,
            error_code,
            description,
        })
    }

    /// Send `text` as Markdown. If Telegram cannot parse the entities, send it
    /// once more as plain text with the markup removed. No further attempts.
    pub async fn deliver(&self, text: &str) -> Result<Attempt, TelegramError> {
        match self.send(Attempt::Rich, text).await {
            Ok(()) => Ok(Attempt::Rich),
            Err(e) if e.is_entity_parse() => {
                warn!(error = %e, "Markdown rejected, retrying as plain text");
                let plain = markdown::strip_markup(text);
                self.send(Attempt::Plain, &plain).await?;
                Ok(Attempt::Plain)
            }
            Err(e) => Err(e),
        }
    }
}

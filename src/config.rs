use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "default_geo_base_url")]
    pub base_url: String,
    #[serde(default = "default_geo_timeout_ms")]
    pub timeout_ms: u64,
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: default_geo_base_url(),
            timeout_ms: default_geo_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { api_base: default_telegram_api_base() }
    }
}

fn default_bind_addr() -> String { "0.0.0.0:3000".to_string() }
fn default_geo_base_url() -> String { "https://ipwho.is".to_string() }
fn default_geo_timeout_ms() -> u64 { 2500 }
fn default_telegram_api_base() -> String { "https://api.telegram.org".to_string() }

impl Config {
    /// Load `.env`, then the TOML file named by `IP_RELAY_CONFIG` (default
    /// `config.toml`). A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("IP_RELAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Bot credentials. Both halves are required for delivery.
#[derive(Clone)]
pub struct Credentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Credentials {
    /// Read `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`. Empty values count as unset.
    pub fn from_env() -> Option<Self> {
        Self::from_parts(
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("TELEGRAM_CHAT_ID").ok(),
        )
    }

    pub fn from_parts(bot_token: Option<String>, chat_id: Option<String>) -> Option<Self> {
        let bot_token = bot_token.filter(|t| !t.is_empty())?;
        let chat_id = chat_id.filter(|c| !c.is_empty())?;
        Some(Self { bot_token, chat_id })
    }
}

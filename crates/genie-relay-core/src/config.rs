//! Relay configuration.
//!
//! Credentials and endpoints come from the environment (see the CLI); the
//! tunables may also come from a TOML file:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! webhook_path = "/telegram/webhook"
//!
//! [relay]
//! stream_timeout_secs = 120
//! max_message_chars = 4000
//!
//! [features]
//! streaming_chat = true
//! forward_history = false
//! history_turns = 10
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::channel::MAX_MESSAGE_CHARS;
use crate::error::{RelayError, Result};

pub const DEFAULT_AI_CHAT_ENDPOINT: &str = "http://localhost:3000/api/ai/chat";
pub const DEFAULT_WEBHOOK_PATH: &str = "/telegram/webhook";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_webhook_path() -> String {
    DEFAULT_WEBHOOK_PATH.to_string()
}

fn default_stream_timeout_secs() -> u64 {
    120
}

fn default_history_turns() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Optional behaviours of the relay
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeatureFlags {
    /// Relay non-command text to the AI chat endpoint
    #[serde(default = "default_true")]
    pub streaming_chat: bool,
    /// Send recent turns of the conversation along with each new message
    #[serde(default)]
    pub forward_history: bool,
    /// Turns kept per chat when history forwarding is on
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            streaming_chat: true,
            forward_history: false,
            history_turns: default_history_turns(),
        }
    }
}

/// How Telegram delivers updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// `getUpdates` long-polling
    Polling,
    /// Telegram pushes updates to this URL
    Webhook { url: String },
}

/// Everything the relay needs at runtime
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bot_token: String,
    pub verify_endpoint: String,
    pub ai_chat_endpoint: String,
    /// Public base URL; selects webhook delivery when set
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_path: String,
    pub host: String,
    pub port: u16,
    pub stream_timeout: Duration,
    pub max_message_chars: usize,
    pub features: FeatureFlags,
}

impl RelayConfig {
    /// Config with the two required settings and defaults for the rest
    pub fn new(bot_token: impl Into<String>, verify_endpoint: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            verify_endpoint: verify_endpoint.into(),
            ai_chat_endpoint: DEFAULT_AI_CHAT_ENDPOINT.to_string(),
            webhook_url: None,
            webhook_secret: None,
            webhook_path: default_webhook_path(),
            host: default_host(),
            port: default_port(),
            stream_timeout: Duration::from_secs(default_stream_timeout_secs()),
            max_message_chars: MAX_MESSAGE_CHARS,
            features: FeatureFlags::default(),
        }
    }

    /// Overlay values read from a config file
    pub fn apply_file(&mut self, file: FileConfig) {
        self.host = file.server.host;
        self.port = file.server.port;
        self.webhook_path = file.server.webhook_path;
        self.stream_timeout = Duration::from_secs(file.relay.stream_timeout_secs);
        self.max_message_chars = file.relay.max_message_chars;
        self.features = file.features;
    }

    /// Check required settings and URL shapes
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(RelayError::Config(
                "TELEGRAM_BOT_TOKEN is missing in your .env file or environment variables."
                    .to_string(),
            ));
        }
        if self.verify_endpoint.trim().is_empty() {
            return Err(RelayError::Config(
                "WEB_APP_VERIFY_ENDPOINT is missing in your .env file or environment variables."
                    .to_string(),
            ));
        }

        parse_http_url("WEB_APP_VERIFY_ENDPOINT", &self.verify_endpoint)?;
        parse_http_url("AI_CHAT_ENDPOINT", &self.ai_chat_endpoint)?;
        if let Some(webhook_url) = &self.webhook_url {
            parse_http_url("WEBHOOK_URL", webhook_url)?;
        }
        if !self.webhook_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "webhook path must start with '/': {}",
                self.webhook_path
            )));
        }
        if self.max_message_chars == 0 {
            return Err(RelayError::Config(
                "max_message_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        match &self.webhook_url {
            Some(base) => DeliveryMode::Webhook {
                url: format!("{}{}", base.trim_end_matches('/'), self.webhook_path),
            },
            None => DeliveryMode::Polling,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_http_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| RelayError::Config(format!("{} is not a valid URL ({}): {}", name, e, value)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RelayError::Config(format!(
            "{} must be an http(s) URL, got scheme '{}'",
            name, other
        ))),
    }
}

/// Tunables read from a TOML file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub features: FeatureFlags,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_path: default_webhook_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_max_message_chars() -> usize {
    MAX_MESSAGE_CHARS
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            stream_timeout_secs: default_stream_timeout_secs(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            RelayError::Config(format!("Failed to read config {}: {}", path.display(), err))
        })?;
        Self::parse(&contents).map_err(|err| match err {
            RelayError::Config(msg) => {
                RelayError::Config(format!("Failed to parse config {}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| RelayError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RelayConfig {
        RelayConfig::new("123:ABC", "https://app.example.com/api/telegram/verify")
    }

    #[test]
    fn test_defaults() {
        let config = valid();
        assert_eq!(config.ai_chat_endpoint, DEFAULT_AI_CHAT_ENDPOINT);
        assert_eq!(config.port, 3000);
        assert_eq!(config.stream_timeout, Duration::from_secs(120));
        assert!(config.features.streaming_chat);
        assert!(!config.features.forward_history);
        assert_eq!(config.delivery_mode(), DeliveryMode::Polling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let mut config = valid();
        config.bot_token = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(ref msg) if msg.contains("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_missing_verify_endpoint_is_config_error() {
        let config = RelayConfig::new("123:ABC", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("WEB_APP_VERIFY_ENDPOINT"));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let config = RelayConfig::new("t", "not a url");
        assert!(config.validate().is_err());

        let mut config = valid();
        config.ai_chat_endpoint = "ftp://example.com/chat".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("ftp"));
    }

    #[test]
    fn test_webhook_delivery_mode() {
        let mut config = valid();
        config.webhook_url = Some("https://bot.example.com/".to_string());
        assert_eq!(
            config.delivery_mode(),
            DeliveryMode::Webhook {
                url: "https://bot.example.com/telegram/webhook".to_string()
            }
        );
    }

    #[test]
    fn test_file_config_overlay() {
        let file = FileConfig::parse(
            r#"
            [server]
            port = 8080

            [relay]
            stream_timeout_secs = 30

            [features]
            forward_history = true
            history_turns = 4
            "#,
        )
        .unwrap();

        let mut config = valid();
        config.apply_file(file);
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.webhook_path, DEFAULT_WEBHOOK_PATH);
        assert_eq!(config.stream_timeout, Duration::from_secs(30));
        assert_eq!(config.max_message_chars, MAX_MESSAGE_CHARS);
        assert!(config.features.streaming_chat);
        assert!(config.features.forward_history);
        assert_eq!(config.features.history_turns, 4);
    }

    #[test]
    fn test_file_config_parse_error() {
        assert!(matches!(
            FileConfig::parse("[server\nport = 1"),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_bad_webhook_path() {
        let mut config = valid();
        config.webhook_path = "hook".to_string();
        assert!(config.validate().is_err());
    }
}

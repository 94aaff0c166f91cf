use clap::{Parser, ValueEnum};
use genie_relay_core::config::DEFAULT_AI_CHAT_ENDPOINT;
use genie_relay_core::{FileConfig, RelayConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "genie-relay")]
#[command(
    version,
    about = "Genie Relay - Telegram bot bridge for the TaskGenie web app"
)]
pub struct Cli {
    /// Telegram bot token from @BotFather
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Web app route that exchanges a connection token for an account link
    #[arg(long, env = "WEB_APP_VERIFY_ENDPOINT")]
    pub verify_endpoint: Option<String>,

    /// Web app route serving the streamed AI chat
    #[arg(long, env = "AI_CHAT_ENDPOINT", default_value = DEFAULT_AI_CHAT_ENDPOINT)]
    pub ai_chat_endpoint: String,

    /// Public base URL for webhook delivery (long-polling when unset)
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Secret Telegram must echo on every webhook request
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Path the webhook route is served on
    #[arg(long, env = "WEBHOOK_PATH")]
    pub webhook_path: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port the HTTP server listens on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Upper bound for reading one AI chat response, in seconds
    #[arg(long, env = "GENIE_RELAY_STREAM_TIMEOUT_SECS")]
    pub stream_timeout_secs: Option<u64>,

    /// Relay free text to the AI chat endpoint
    #[arg(long, env = "GENIE_RELAY_STREAMING_CHAT")]
    pub streaming_chat: Option<bool>,

    /// Send recent turns along with each chat message
    #[arg(long, env = "GENIE_RELAY_FORWARD_HISTORY")]
    pub forward_history: Option<bool>,

    /// Turns kept per chat when history forwarding is on
    #[arg(long, env = "GENIE_RELAY_HISTORY_TURNS")]
    pub history_turns: Option<usize>,

    /// TOML file with server, relay and feature settings
    #[arg(short, long, env = "GENIE_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Assemble the relay config: defaults, then the config file, then
    /// command line and environment.
    pub fn relay_config(&self) -> genie_relay_core::Result<RelayConfig> {
        let mut config = RelayConfig::new(
            self.bot_token.clone().unwrap_or_default(),
            self.verify_endpoint.clone().unwrap_or_default(),
        );

        if let Some(path) = &self.config {
            config.apply_file(FileConfig::load(path)?);
        }

        config.ai_chat_endpoint = self.ai_chat_endpoint.clone();
        config.webhook_url = self.webhook_url.clone().filter(|url| !url.is_empty());
        config.webhook_secret = self.webhook_secret.clone().filter(|s| !s.is_empty());
        if let Some(path) = &self.webhook_path {
            config.webhook_path = path.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.stream_timeout_secs {
            config.stream_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.streaming_chat {
            config.features.streaming_chat = enabled;
        }
        if let Some(enabled) = self.forward_history {
            config.features.forward_history = enabled;
        }
        if let Some(turns) = self.history_turns {
            config.features.history_turns = turns;
        }

        config.validate()?;
        Ok(config)
    }
}

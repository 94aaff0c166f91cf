//! Telegram Channel Implementation
//!
//! Talks to the Telegram Bot API. Sends text (split to the per-message
//! limit), typing indicators, and receives updates either by long-polling
//! `getUpdates` or by parsing webhook payloads.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::chunk::{MAX_MESSAGE_CHARS, chunk_text};
use super::traits::{Channel, InboundStream, WebhookReceiver};
use super::types::{InboundMessage, MessageLevel, OutboundMessage};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Default timeout for Telegram API calls (seconds)
const API_TIMEOUT_SECS: u64 = 30;
/// Pause before polling again after a failed `getUpdates`
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    pub bot_token: String,
    /// Polling timeout in seconds (default: 30)
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout: u32,
    /// Secret expected in `X-Telegram-Bot-Api-Secret-Token` on webhook calls
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_polling_timeout() -> u32 {
    30
}

fn default_api_base() -> String {
    TELEGRAM_API_BASE.to_string()
}

impl TelegramConfig {
    /// Create a new config with just the bot token
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            polling_timeout: default_polling_timeout(),
            webhook_secret: None,
            api_base: default_api_base(),
        }
    }

    /// Set polling timeout
    pub fn with_polling_timeout(mut self, timeout: u32) -> Self {
        self.polling_timeout = timeout;
        self
    }

    /// Set webhook secret
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Point the client at a different Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Telegram channel implementation
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
    /// Whether polling is active
    polling_active: Arc<AtomicBool>,
    /// Last update ID for long-polling
    last_update_id: Arc<AtomicI64>,
}

impl TelegramChannel {
    /// Create a new Telegram channel
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            polling_active: Arc::new(AtomicBool::new(false)),
            last_update_id: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Create with just bot token
    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self::new(TelegramConfig::new(bot_token))
    }

    /// Ask the polling loop to stop after the current `getUpdates` call
    pub fn stop_polling(&self) {
        self.polling_active.store(false, Ordering::SeqCst);
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base, self.config.bot_token, method
        )
    }

    /// Call a Bot API method and unwrap the `{ ok, result }` envelope
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&params)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body: TelegramResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                return Err(anyhow!("Telegram HTTP error {}: {}", status, e));
            }
            Err(e) => return Err(e.into()),
        };

        if body.ok {
            body.result
                .ok_or_else(|| anyhow!("Telegram returned ok but no result"))
        } else {
            Err(anyhow!(
                "Telegram API error ({}): {}",
                method,
                body.description.unwrap_or_default()
            ))
        }
    }

    /// Send one message via Telegram API
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<TelegramMessageResponse> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        self.call(
            "sendMessage",
            params,
            Duration::from_secs(API_TIMEOUT_SECS),
        )
        .await
    }

    /// Poll for updates using long-polling
    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let offset = self.last_update_id.load(Ordering::SeqCst);
        let params = serde_json::json!({
            "offset": if offset > 0 { offset + 1 } else { 0 },
            "timeout": self.config.polling_timeout,
            "allowed_updates": ["message"],
        });

        let updates: Vec<TelegramUpdate> = self
            .call(
                "getUpdates",
                params,
                Duration::from_secs(self.config.polling_timeout as u64 + 10),
            )
            .await?;

        if let Some(last) = updates.last() {
            self.last_update_id.store(last.update_id, Ordering::SeqCst);
        }

        Ok(updates)
    }

    /// Convert a Telegram update to an InboundMessage
    ///
    /// Only text messages with a sender are relayed.
    fn convert_update(update: TelegramUpdate) -> Option<InboundMessage> {
        let message = update.message?;
        let from = message.from?;
        let text = message.text?;

        let metadata = serde_json::json!({
            "chat_type": message.chat.r#type,
            "update_id": update.update_id,
            "username": from.username,
        });

        let mut inbound = InboundMessage::new(
            format!("tg_{}", message.message_id),
            from.id,
            message.chat.id,
            text,
        )
        .with_metadata(metadata);
        if let Some(first_name) = from.first_name {
            inbound = inbound.with_first_name(first_name);
        }
        Some(inbound)
    }

    /// Test the connection by calling getMe
    pub async fn test_connection(&self) -> Result<TelegramUser> {
        self.call(
            "getMe",
            serde_json::json!({}),
            Duration::from_secs(API_TIMEOUT_SECS),
        )
        .await
    }

    /// Register `url` as the webhook Telegram delivers updates to
    pub async fn set_webhook(&self, url: &str) -> Result<()> {
        let mut params = serde_json::json!({
            "url": url,
            "allowed_updates": ["message"],
        });
        if let Some(secret) = &self.config.webhook_secret {
            params["secret_token"] = serde_json::Value::String(secret.clone());
        }

        let _: bool = self
            .call("setWebhook", params, Duration::from_secs(API_TIMEOUT_SECS))
            .await?;
        info!(url = %url, "Telegram webhook registered");
        Ok(())
    }

    /// Remove any registered webhook so `getUpdates` can be used
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self
            .call(
                "deleteWebhook",
                serde_json::json!({}),
                Duration::from_secs(API_TIMEOUT_SECS),
            )
            .await?;
        debug!("Telegram webhook removed");
        Ok(())
    }

    fn clone_for_polling(&self) -> Self {
        Self {
            config: self.config.clone(),
            client: self.client.clone(),
            polling_active: self.polling_active.clone(),
            last_update_id: self.last_update_id.clone(),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "Telegram"
    }

    fn is_configured(&self) -> bool {
        !self.config.bot_token.is_empty()
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        match message.level {
            MessageLevel::Warning | MessageLevel::Error => {
                warn!(chat_id = message.chat_id, "Replying: {}", message.content)
            }
            _ => debug!(
                chat_id = message.chat_id,
                len = message.content.len(),
                "Replying"
            ),
        }

        // Callers normally chunk already; this keeps oversized replies deliverable.
        for chunk in chunk_text(&message.content, MAX_MESSAGE_CHARS) {
            self.send_message(message.chat_id, &chunk).await?;
        }

        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        let _: bool = self
            .call(
                "sendChatAction",
                params,
                Duration::from_secs(API_TIMEOUT_SECS),
            )
            .await?;
        debug!("Sent typing indicator to {}", chat_id);
        Ok(())
    }

    fn start_receiving(&self) -> Option<InboundStream> {
        if !self.is_configured() {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = self.clone_for_polling();
        channel.polling_active.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!("Starting Telegram polling");

            while channel.polling_active.load(Ordering::SeqCst) {
                match channel.poll_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            if let Some(message) = Self::convert_update(update) {
                                debug!(
                                    "Received Telegram message: {} from {}",
                                    message.id, message.user_id
                                );
                                if tx.send(message).is_err() {
                                    warn!("Message receiver dropped, stopping polling");
                                    channel.polling_active.store(false, Ordering::SeqCst);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Telegram polling error: {}", e);
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }

            info!("Telegram polling stopped");
        });

        Some(Box::pin(
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        ))
    }
}

#[async_trait]
impl WebhookReceiver for TelegramChannel {
    async fn handle_webhook(&self, payload: &[u8]) -> Result<Vec<InboundMessage>> {
        let update: TelegramUpdate = serde_json::from_slice(payload)?;
        Ok(Self::convert_update(update).into_iter().collect())
    }

    fn verify_secret(&self, provided: Option<&str>) -> bool {
        match &self.config.webhook_secret {
            Some(secret) => {
                constant_time_eq(secret.as_bytes(), provided.unwrap_or("").as_bytes())
            }
            None => true,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Telegram API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct TelegramMessageResponse {
    #[allow(dead_code)]
    message_id: i64,
}

// ============================================================================
// Tests
// ============================================================================

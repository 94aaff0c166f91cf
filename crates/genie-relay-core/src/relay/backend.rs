//! HTTP client for the web application's bot endpoints.
//!
//! Three routes are consumed: token verification, connection status and the
//! streamed AI chat. Handlers depend on the `Backend` trait so they can be
//! exercised against an in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Default timeout for the verify and connection-check calls (seconds)
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Connect timeout for every backend call (seconds)
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Streamed response body of the chat endpoint.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Body of the verify call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub token: String,
    pub telegram_user_id: i64,
    pub chat_id: i64,
}

/// Result of a verify call that reached the backend
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// 2xx, with the backend's optional success message
    Verified { message: Option<String> },
    /// Non-2xx, with the backend's optional error and the HTTP status text
    Rejected {
        error: Option<String>,
        status_text: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct VerifyResponseBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckConnectionRequest {
    telegram_user_id: String,
}

#[derive(Debug, Deserialize)]
struct CheckConnectionResponse {
    #[serde(default)]
    connected: Option<bool>,
}

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message in the chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Who is chatting, forwarded so the backend can resolve the linked account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramContext {
    pub user_id: i64,
    pub user_name: String,
    pub chat_id: i64,
}

/// Body of the AI chat call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub telegram_context: TelegramContext,
}

/// The web application's bot-facing API
#[async_trait]
pub trait Backend: Send + Sync {
    /// Exchange a one-time token for a link between this Telegram user and an account
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome>;

    /// Whether the Telegram user is linked to an account
    ///
    /// Any failure counts as not connected.
    async fn check_connection(&self, telegram_user_id: i64) -> bool;

    /// Start an AI chat round trip and return the streamed body
    async fn chat(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// Backend URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoints {
    pub verify_url: String,
    pub check_connection_url: String,
    pub chat_url: String,
}

impl BackendEndpoints {
    /// The connection-check route lives next to the verify route.
    pub fn new(verify_url: impl Into<String>, chat_url: impl Into<String>) -> Self {
        let verify_url = verify_url.into();
        let check_connection_url = verify_url.replacen("/verify", "/check-connection", 1);
        Self {
            verify_url,
            check_connection_url,
            chat_url: chat_url.into(),
        }
    }
}

/// `Backend` over HTTP
pub struct HttpBackend {
    client: Client,
    endpoints: BackendEndpoints,
}

impl HttpBackend {
    pub fn new(endpoints: BackendEndpoints) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        let response = self
            .client
            .post(&self.endpoints.verify_url)
            .json(request)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();

        if status.is_success() {
            let body: VerifyResponseBody = response.json().await?;
            debug!(user_id = request.telegram_user_id, "Token verified");
            Ok(VerifyOutcome::Verified {
                message: body.message,
            })
        } else {
            let raw = response.text().await.unwrap_or_default();
            let body: VerifyResponseBody = serde_json::from_str(&raw).unwrap_or_default();
            warn!(
                user_id = request.telegram_user_id,
                status = status.as_u16(),
                "Token verification rejected"
            );
            Ok(VerifyOutcome::Rejected {
                error: body.error,
                status_text,
            })
        }
    }

    async fn check_connection(&self, telegram_user_id: i64) -> bool {
        let request = CheckConnectionRequest {
            telegram_user_id: telegram_user_id.to_string(),
        };

        let response = match self
            .client
            .post(&self.endpoints.check_connection_url)
            .json(&request)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(user_id = telegram_user_id, error = %e, "Error checking user connection");
                return false;
            }
        };

        if !response.status().is_success() {
            debug!(
                user_id = telegram_user_id,
                status = response.status().as_u16(),
                "Connection check returned non-success"
            );
            return false;
        }

        match response.json::<CheckConnectionResponse>().await {
            Ok(body) => body.connected.unwrap_or(false),
            Err(e) => {
                warn!(user_id = telegram_user_id, error = %e, "Malformed connection check response");
                false
            }
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ByteStream> {
        let response = self
            .client
            .post(&self.endpoints.chat_url)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "AI chat response status");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from))
            .boxed())
    }
}

//! Channel message types
//!
//! Core types exchanged between the Telegram channel and the relay handlers.

use serde::{Deserialize, Serialize};

/// Message level, used for log severity of outgoing replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Inbound text message from a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message ID (`tg_<message_id>`)
    pub id: String,
    /// Sender's Telegram user ID
    pub user_id: i64,
    /// Sender's first name (if available)
    pub first_name: Option<String>,
    /// Chat the message was sent in
    pub chat_id: i64,
    /// Message text
    pub text: String,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: i64,
    /// Channel-specific metadata
    pub metadata: Option<serde_json::Value>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(id: impl Into<String>, user_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id,
            first_name: None,
            chat_id,
            text: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: None,
        }
    }

    /// Set sender first name
    pub fn with_first_name(mut self, name: impl Into<String>) -> Self {
        self.first_name = Some(name.into());
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Name used when greeting the sender.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("User")
    }
}

/// Outbound message to a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target chat
    pub chat_id: i64,
    /// Message content
    pub content: String,
    /// Message level for logging
    pub level: MessageLevel,
}

impl OutboundMessage {
    /// Create a new plain-text outbound message
    pub fn new(chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            level: MessageLevel::Info,
        }
    }

    /// Set message level
    pub fn with_level(mut self, level: MessageLevel) -> Self {
        self.level = level;
        self
    }

    pub fn success(chat_id: i64, content: impl Into<String>) -> Self {
        Self::new(chat_id, content).with_level(MessageLevel::Success)
    }

    pub fn warning(chat_id: i64, content: impl Into<String>) -> Self {
        Self::new(chat_id, content).with_level(MessageLevel::Warning)
    }

    pub fn error(chat_id: i64, content: impl Into<String>) -> Self {
        Self::new(chat_id, content).with_level(MessageLevel::Error)
    }
}

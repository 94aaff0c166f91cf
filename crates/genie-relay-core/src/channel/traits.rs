//! Channel Trait Definitions
//!
//! Defines the traits a chat channel implements so the relay handlers can
//! reply without knowing how messages are delivered.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::{InboundMessage, OutboundMessage};

/// Stream of inbound messages produced by a receiving channel.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Chat channel that can send and optionally receive messages
///
/// # Example
///
/// ```ignore
/// struct MyChannel { /* ... */ }
///
/// #[async_trait]
/// impl Channel for MyChannel {
///     fn name(&self) -> &str {
///         "my-channel"
///     }
///
///     fn is_configured(&self) -> bool {
///         !self.token.is_empty()
///     }
///
///     async fn send(&self, message: OutboundMessage) -> Result<()> {
///         Ok(())
///     }
///
///     fn start_receiving(&self) -> Option<InboundStream> {
///         None
///     }
/// }
/// ```
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel display name
    fn name(&self) -> &str;

    /// Check if channel is properly configured
    fn is_configured(&self) -> bool;

    /// Send a message to the channel
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Send a simple text message
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send(OutboundMessage::new(chat_id, text)).await
    }

    /// Show a typing indicator while a reply is being produced
    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let _ = chat_id;
        Ok(())
    }

    /// Start receiving messages (returns None if channel doesn't support receiving)
    ///
    /// The returned stream yields messages as they arrive from the channel.
    fn start_receiving(&self) -> Option<InboundStream>;
}

/// Channel that supports webhook-style message receiving
#[async_trait]
pub trait WebhookReceiver: Channel {
    /// Parse a webhook payload into inbound messages
    ///
    /// Returns an empty list when the payload carries no text message.
    async fn handle_webhook(&self, payload: &[u8]) -> Result<Vec<InboundMessage>>;

    /// Verify the shared secret sent along with the webhook request
    fn verify_secret(&self, provided: Option<&str>) -> bool {
        let _ = provided;
        true
    }
}

//! Chat Channel Layer
//!
//! Everything the relay needs to talk to the chat platform: message types,
//! the `Channel` trait handlers reply through, the Telegram Bot API client and
//! the length-bounded chunker used for long replies.
//!
//! ```text
//!   Telegram ──getUpdates / webhook──▶ InboundMessage ──▶ relay handlers
//!       ▲                                                   │
//!       └──────────── sendMessage ◀── OutboundMessage ◀─────┘
//! ```

pub mod chunk;
pub mod telegram;
mod traits;
mod types;

pub use chunk::{MAX_MESSAGE_CHARS, chunk_text};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use traits::{Channel, InboundStream, WebhookReceiver};
pub use types::{InboundMessage, MessageLevel, OutboundMessage};

#[cfg(test)]
pub use traits::mock;

//! Telegram relay for the TaskGenie web application.
//!
//! Links Telegram users to application accounts through one-time tokens and
//! relays their chat messages to the application's streamed AI chat endpoint,
//! reassembling the tagged line protocol into plain replies that fit
//! Telegram's message size limit.

pub mod channel;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;

pub use config::{DeliveryMode, FeatureFlags, FileConfig, RelayConfig};
pub use error::{RelayError, Result};
pub use relay::RelayContext;

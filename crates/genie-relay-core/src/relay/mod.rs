//! Relay runtime: everything between an inbound chat message and the replies
//! sent back for it.

pub mod backend;
pub mod commands;
mod context;
pub mod handler;
mod history;
pub mod router;
pub mod stream;

pub use backend::{
    Backend, BackendEndpoints, ChatRequest, ChatRole, ChatTurn, HttpBackend, TelegramContext,
    VerifyOutcome, VerifyRequest,
};
pub use context::RelayContext;
pub use handler::{handle_message, run_polling, spawn_message};
pub use history::ConversationHistory;
pub use router::{MessageRouter, RouteDecision};
pub use stream::{EMPTY_RESPONSE_FALLBACK, StreamReassembler, reassemble};

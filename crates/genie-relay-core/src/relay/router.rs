//! Message Router - decides how an inbound message is handled.

use crate::channel::InboundMessage;

/// Routing decision for an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Bot command such as `/verify <token>`.
    HandleCommand { command: String, args: Vec<String> },
    /// Free text for the connection check and AI round trip.
    DispatchToChat,
    /// Nothing to do.
    Ignore,
}

/// Prefix that marks a bot command.
const COMMAND_PREFIX: char = '/';

/// Splits commands from chat text.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageRouter;

impl MessageRouter {
    /// Only text whose first character is `/` is a command.
    pub fn route(&self, message: &InboundMessage) -> RouteDecision {
        let text = message.text.as_str();
        if text.trim().is_empty() {
            return RouteDecision::Ignore;
        }

        if text.starts_with(COMMAND_PREFIX) {
            return match Self::parse_command(text) {
                Some((command, args)) => RouteDecision::HandleCommand { command, args },
                None => RouteDecision::Ignore,
            };
        }

        RouteDecision::DispatchToChat
    }

    /// Parse `/command@botname arg1 arg2` into `("command", [arg1, arg2])`.
    fn parse_command(content: &str) -> Option<(String, Vec<String>)> {
        let trimmed = content.strip_prefix(COMMAND_PREFIX)?;
        let mut parts = trimmed.split_whitespace();

        let head = parts.next()?;
        let command = head.split('@').next().unwrap_or(head).to_lowercase();
        if command.is_empty() {
            return None;
        }

        let args = parts.map(str::to_string).collect();
        Some((command, args))
    }
}

//! Bot Command Handler
//!
//! Handles `/start`, `/verify` and `/help`; anything else gets a pointer to `/help`.

use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::channel::{InboundMessage, OutboundMessage};

use super::backend::{VerifyOutcome, VerifyRequest};
use super::context::RelayContext;

#[cfg(test)]
const CAPABILITIES_DELAY: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const CAPABILITIES_DELAY: Duration = Duration::from_secs(1);

pub const WELCOME_TEXT: &str = "Welcome! I can help you connect your account.\n\
Please get a connection token from the web application and then send it to me using the command:\n\
/verify YOUR_TOKEN_HERE";

pub const VERIFY_USAGE_TEXT: &str =
    "Please provide a token after /verify. Usage: /verify YOUR_TOKEN_HERE";

pub const VERIFY_TRANSPORT_ERROR_TEXT: &str = "Sorry, there was an error communicating with the verification service. Please try again later.";

pub const CAPABILITIES_TEXT: &str = "🤖 Great! Now I'm your AI assistant. You can:\n\n\
📝 Create tasks: 'Create a task to call the client tomorrow'\n\
🔍 Search tasks: 'What tasks do I have today?'\n\
💡 Ask questions: 'Help me prioritize my work'\n\
💾 Save info: 'Remember I prefer morning meetings'\n\n\
Just chat with me naturally!";

pub const HELP_TEXT: &str = "🤖 TaskGenie AI Assistant\n\n\
Commands:\n\
/start - Welcome message\n\
/verify <token> - Connect your account\n\
/help - Show this help\n\n\
Once connected, just chat naturally! I can:\n\
📝 Create and manage tasks\n\
🔍 Search your existing tasks\n\
💡 Answer questions from your knowledge\n\
📊 Help with planning and priorities";

/// Handle a parsed command
pub async fn handle_command(
    ctx: &RelayContext,
    message: &InboundMessage,
    command: &str,
    args: &[String],
) -> Result<()> {
    debug!(command, user_id = message.user_id, "Handling command");

    match command {
        "start" => reply(ctx, message, WELCOME_TEXT).await,
        "verify" => cmd_verify(ctx, message, args.first().map(String::as_str)).await,
        "help" => send_help(ctx, message).await,
        _ => cmd_unknown(ctx, message, command).await,
    }
}

/// Send the help text
pub async fn send_help(ctx: &RelayContext, message: &InboundMessage) -> Result<()> {
    reply(ctx, message, HELP_TEXT).await
}

async fn reply(ctx: &RelayContext, message: &InboundMessage, text: &str) -> Result<()> {
    ctx.channel
        .send(OutboundMessage::new(message.chat_id, text))
        .await
}

/// Exchange a connection token for an account link
async fn cmd_verify(
    ctx: &RelayContext,
    message: &InboundMessage,
    token: Option<&str>,
) -> Result<()> {
    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => {
            let response = OutboundMessage::warning(message.chat_id, VERIFY_USAGE_TEXT);
            return ctx.channel.send(response).await;
        }
    };

    let progress = format!("Attempting to verify token: {}...", token);
    if let Err(e) = reply(ctx, message, &progress).await {
        warn!(chat_id = message.chat_id, error = %e, "Failed to send verify progress notice");
    }

    let request = VerifyRequest {
        token: token.to_string(),
        telegram_user_id: message.user_id,
        chat_id: message.chat_id,
    };

    match ctx.backend.verify(&request).await {
        Ok(VerifyOutcome::Verified { message: text }) => {
            info!(user_id = message.user_id, chat_id = message.chat_id, "Account connected");
            let text = text.unwrap_or_else(|| {
                format!(
                    "Token verified successfully! Your Telegram User ID is {} and Chat ID is {}.",
                    message.user_id, message.chat_id
                )
            });
            ctx.channel
                .send(OutboundMessage::success(message.chat_id, text))
                .await?;

            sleep(CAPABILITIES_DELAY).await;
            reply(ctx, message, CAPABILITIES_TEXT).await
        }
        Ok(VerifyOutcome::Rejected { error, status_text }) => {
            let reason = error
                .filter(|e| !e.is_empty())
                .or_else(|| Some(status_text).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| "Unknown error".to_string());
            let response =
                OutboundMessage::error(message.chat_id, format!("Verification failed: {}", reason));
            ctx.channel.send(response).await
        }
        Err(e) => {
            error!(user_id = message.user_id, error = %e, "Error sending token to web app");
            let response = OutboundMessage::error(message.chat_id, VERIFY_TRANSPORT_ERROR_TEXT);
            ctx.channel.send(response).await
        }
    }
}

async fn cmd_unknown(ctx: &RelayContext, message: &InboundMessage, command: &str) -> Result<()> {
    let response = OutboundMessage::warning(
        message.chat_id,
        format!("❓ Unknown command: /{}\n\nUse /help to see available commands.", command),
    );
    ctx.channel.send(response).await
}

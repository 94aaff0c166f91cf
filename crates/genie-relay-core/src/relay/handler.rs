//! Relay Message Handler
//!
//! Processes inbound chat messages: commands go to the command handler, other
//! text is checked against the backend's connection status and, for linked
//! users, relayed to the AI chat endpoint.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::channel::{InboundMessage, OutboundMessage};
use crate::error::RelayError;

use super::backend::{ChatRequest, ChatTurn, TelegramContext};
use super::commands::handle_command;
use super::context::RelayContext;
use super::router::{MessageRouter, RouteDecision};
use super::stream::{EMPTY_RESPONSE_FALLBACK, preview, reassemble};

#[cfg(test)]
const STREAM_RECONNECT_DELAY: Duration = Duration::from_millis(20);
#[cfg(not(test))]
const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Reply for linked users when AI chat is switched off
pub const CHAT_DISABLED_TEXT: &str = "✅ Your account is connected, but AI chat is currently disabled. Use /help to see what I can do.";

/// Instructions for users who have not linked an account yet
pub fn connect_prompt(name: &str) -> String {
    format!(
        "👋 Hi {}! I'm TaskGenie, your AI productivity assistant.\n\n\
To get started, please connect your account:\n\
1. Visit your TaskGenie settings page\n\
2. Generate a connection token\n\
3. Send me: /verify <your-token>\n\n\
Once connected, I can help you manage tasks, answer questions, and more!",
        name
    )
}

/// Handle a single inbound message to completion
pub async fn handle_message(ctx: &RelayContext, message: &InboundMessage) -> Result<()> {
    let router = MessageRouter::default();

    match router.route(message) {
        RouteDecision::HandleCommand { command, args } => {
            handle_command(ctx, message, &command, &args).await
        }
        RouteDecision::DispatchToChat => handle_chat_text(ctx, message).await,
        RouteDecision::Ignore => {
            debug!(message_id = %message.id, "Ignoring message");
            Ok(())
        }
    }
}

/// Run `handle_message` on its own task
pub fn spawn_message(ctx: Arc<RelayContext>, message: InboundMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = handle_message(&ctx, &message).await {
            error!(
                message_id = %message.id,
                chat_id = message.chat_id,
                error = %e,
                "Failed to handle message"
            );
        }
    })
}

/// Consume the channel's receive stream until the context is cancelled.
///
/// Each message is handled on its own task. When the stream ends or cannot be
/// started, receiving is restarted after a short delay.
pub async fn run_polling(ctx: Arc<RelayContext>) {
    info!(channel = ctx.channel.name(), "Listening for messages");

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let mut stream = match ctx.channel.start_receiving() {
            Some(stream) => stream,
            None => {
                warn!(
                    "Failed to start message stream, retrying in {:?}",
                    STREAM_RECONNECT_DELAY
                );
                if cancelled_during(&ctx, STREAM_RECONNECT_DELAY).await {
                    break;
                }
                continue;
            }
        };

        loop {
            let message = tokio::select! {
                _ = ctx.cancel.cancelled() => None,
                next = stream.next() => next,
            };
            let Some(message) = message else {
                break;
            };

            debug!(
                message_id = %message.id,
                user_id = message.user_id,
                "Received message"
            );
            spawn_message(ctx.clone(), message);
        }

        if ctx.cancel.is_cancelled() {
            break;
        }
        warn!("Message stream ended, restarting");
        if cancelled_during(&ctx, STREAM_RECONNECT_DELAY).await {
            break;
        }
    }

    info!("Stopped listening for messages");
}

/// Wait for `delay`; true if the context was cancelled first.
async fn cancelled_during(ctx: &RelayContext, delay: Duration) -> bool {
    tokio::select! {
        _ = ctx.cancel.cancelled() => true,
        _ = sleep(delay) => false,
    }
}

async fn handle_chat_text(ctx: &RelayContext, message: &InboundMessage) -> Result<()> {
    if !ctx.backend.check_connection(message.user_id).await {
        debug!(user_id = message.user_id, "User not connected");
        let prompt = connect_prompt(message.display_name());
        return ctx
            .channel
            .send(OutboundMessage::new(message.chat_id, prompt))
            .await;
    }

    if !ctx.config.features.streaming_chat {
        return ctx
            .channel
            .send(OutboundMessage::new(message.chat_id, CHAT_DISABLED_TEXT))
            .await;
    }

    process_ai_chat(ctx, message).await
}

/// Relay `message` to the AI chat endpoint and send the reply back.
///
/// Any failure produces exactly one apology, except cancellation on shutdown.
pub async fn process_ai_chat(ctx: &RelayContext, message: &InboundMessage) -> Result<()> {
    info!(
        user_id = message.user_id,
        text = %preview(&message.text, 50),
        "Processing AI chat"
    );

    if let Err(e) = ctx.channel.send_typing(message.chat_id).await {
        warn!(chat_id = message.chat_id, error = %e, "Failed to send typing indicator");
    }

    match relay_chat(ctx, message).await {
        Ok(()) => Ok(()),
        Err(e) if !e.is_reportable() => {
            info!(chat_id = message.chat_id, "AI chat aborted: {}", e);
            Ok(())
        }
        Err(e) => {
            error!(chat_id = message.chat_id, error = %e, "AI chat failed");
            ctx.channel
                .send(OutboundMessage::error(message.chat_id, e.user_message()))
                .await
        }
    }
}

async fn relay_chat(ctx: &RelayContext, message: &InboundMessage) -> crate::error::Result<()> {
    let messages = match &ctx.history {
        Some(history) => history.messages_for(message.chat_id, &message.text).await,
        None => vec![ChatTurn::user(message.text.as_str())],
    };

    let request = ChatRequest {
        messages,
        telegram_context: TelegramContext {
            user_id: message.user_id,
            user_name: message.display_name().to_string(),
            chat_id: message.chat_id,
        },
    };

    // One deadline covers both the request and reading its body.
    let timeout = ctx.config.stream_timeout;
    let started = Instant::now();
    let stream = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(RelayError::Cancelled),
        result = tokio::time::timeout(timeout, ctx.backend.chat(&request)) => match result {
            Ok(stream) => stream?,
            Err(_) => return Err(RelayError::Timeout(timeout)),
        },
    };

    let remaining = timeout.saturating_sub(started.elapsed());
    let reply = reassemble(stream, ctx.config.max_message_chars, remaining, &ctx.cancel)
        .await
        .map_err(|e| match e {
            RelayError::Timeout(_) => RelayError::Timeout(timeout),
            other => other,
        })?;

    let answered = reply.is_some();
    let chunks = reply.unwrap_or_else(|| vec![EMPTY_RESPONSE_FALLBACK.to_string()]);

    debug!(chunks = chunks.len(), answered, "Sending AI response");
    for chunk in &chunks {
        ctx.channel
            .send(OutboundMessage::new(message.chat_id, chunk.as_str()))
            .await
            .map_err(RelayError::from)?;
    }

    // Only turns that produced assistant text are remembered.
    if let Some(history) = ctx.history.as_ref().filter(|_| answered) {
        history
            .record(message.chat_id, &message.text, &chunks.concat())
            .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageLevel;
    use crate::channel::mock::MockChannel;
    use crate::config::RelayConfig;
    use crate::error::GENERIC_APOLOGY;
    use crate::relay::backend::ChatRole;
    use crate::relay::backend::fake::FakeBackend;
    use crate::relay::commands::{HELP_TEXT, VERIFY_USAGE_TEXT};

    fn config() -> RelayConfig {
        RelayConfig::new("123:ABC", "http://localhost/api/telegram/verify")
    }

    fn setup_with(
        config: RelayConfig,
        backend: FakeBackend,
    ) -> (Arc<RelayContext>, Arc<MockChannel>, Arc<FakeBackend>) {
        let channel = Arc::new(MockChannel::new());
        let backend = Arc::new(backend);
        let ctx = RelayContext::new(config, channel.clone(), backend.clone());
        (Arc::new(ctx), channel, backend)
    }

    fn setup(backend: FakeBackend) -> (Arc<RelayContext>, Arc<MockChannel>, Arc<FakeBackend>) {
        setup_with(config(), backend)
    }

    fn create_message(text: &str) -> InboundMessage {
        InboundMessage::new("tg_7", 42, 99, text).with_first_name("Ada")
    }

    #[tokio::test]
    async fn test_chat_reply_relayed() {
        let (ctx, channel, backend) = setup(
            FakeBackend::new().with_chat_chunks(&["0:\"Hi \"\n", "0:\"there!\"\n"]),
        );

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        assert_eq!(channel.sent_texts().await, vec!["Hi there!"]);
        assert_eq!(channel.typing_count(), 1);

        let calls = backend.chat_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages, vec![ChatTurn::user("hello")]);
        assert_eq!(calls[0].telegram_context.user_name, "Ada");
        assert_eq!(calls[0].telegram_context.chat_id, 99);
    }

    #[tokio::test]
    async fn test_long_reply_sent_in_order() {
        let mut config = config();
        config.max_message_chars = 5;
        let (ctx, channel, _) = setup_with(
            config,
            FakeBackend::new().with_chat_chunks(&["0:\"abcdefghijkl\"\n"]),
        );

        handle_message(&ctx, &create_message("spell")).await.unwrap();

        assert_eq!(channel.sent_texts().await, vec!["abcde", "fghij", "kl"]);
    }

    #[tokio::test]
    async fn test_empty_reply_sends_fallback() {
        let (ctx, channel, _) =
            setup(FakeBackend::new().with_chat_chunks(&["2:[{\"x\":1}]\n", "8:{}\n"]));

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        assert_eq!(channel.sent_texts().await, vec![EMPTY_RESPONSE_FALLBACK]);
    }

    #[tokio::test]
    async fn test_not_connected_gets_connect_prompt() {
        let (ctx, channel, backend) = setup(FakeBackend::new().disconnected());

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        let texts = channel.sent_texts().await;
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("👋 Hi Ada!"));
        assert!(texts[0].contains("/verify <your-token>"));
        assert!(backend.chat_calls.lock().unwrap().is_empty());
        assert_eq!(channel.typing_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_prompt_default_name() {
        let (ctx, channel, _) = setup(FakeBackend::new().disconnected());

        handle_message(&ctx, &InboundMessage::new("tg_1", 1, 1, "hi"))
            .await
            .unwrap();

        assert!(channel.sent_texts().await[0].starts_with("👋 Hi User!"));
    }

    #[tokio::test]
    async fn test_upstream_error_sends_one_apology() {
        let (ctx, channel, _) = setup(FakeBackend::new().with_chat_status(500));

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        let sent = channel.get_sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, GENERIC_APOLOGY);
        assert_eq!(sent[0].level, MessageLevel::Error);
    }

    #[tokio::test]
    async fn test_stream_timeout_sends_one_apology() {
        let mut config = config();
        config.stream_timeout = Duration::from_millis(30);
        let (ctx, channel, _) = setup_with(config, FakeBackend::new().with_stalled_chat());

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        let texts = channel.sent_texts().await;
        assert_eq!(texts.len(), 1);
        assert_eq!(
            texts[0],
            RelayError::Timeout(Duration::from_millis(30)).user_message()
        );
    }

    #[tokio::test]
    async fn test_cancelled_read_sends_nothing() {
        let (ctx, channel, _) = setup(FakeBackend::new().with_stalled_chat());
        ctx.cancel.cancel();

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        assert!(channel.sent_texts().await.is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let mut config = config();
        config.stream_timeout = Duration::from_millis(30);
        let (ctx, channel, backend) = setup_with(config, FakeBackend::new().with_hung_chat());

        tokio::time::timeout(
            Duration::from_secs(2),
            handle_message(&ctx, &create_message("hello")),
        )
        .await
        .expect("chat request should be bounded by the stream timeout")
        .unwrap();

        assert_eq!(backend.chat_calls.lock().unwrap().len(), 1);
        let sent = channel.get_sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].content,
            RelayError::Timeout(Duration::from_millis(30)).user_message()
        );
        assert_eq!(sent[0].level, MessageLevel::Error);
    }

    #[tokio::test]
    async fn test_cancel_during_unanswered_request() {
        let (ctx, channel, _) = setup(FakeBackend::new().with_hung_chat());

        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { handle_message(&ctx, &create_message("hello")).await }
        });
        sleep(Duration::from_millis(20)).await;
        ctx.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("cancel should abort the pending chat request")
            .unwrap()
            .unwrap();
        assert!(channel.sent_texts().await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_chat_endpoint_times_out() {
        use crate::relay::backend::{BackendEndpoints, HttpBackend};
        use axum::{Router, routing::post};

        async fn slow_chat() -> &'static str {
            sleep(Duration::from_secs(30)).await;
            "0:\"too late\"\n"
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/ai/chat", post(slow_chat));
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });

        let base = format!("http://{}", addr);
        let backend = HttpBackend::new(BackendEndpoints::new(
            format!("{}/api/telegram/verify", base),
            format!("{}/api/ai/chat", base),
        ))
        .unwrap();

        let mut config = config();
        config.stream_timeout = Duration::from_millis(100);
        let channel = Arc::new(MockChannel::new());
        let ctx = RelayContext::new(config, channel.clone(), Arc::new(backend));

        tokio::time::timeout(
            Duration::from_secs(3),
            process_ai_chat(&ctx, &create_message("hello")),
        )
        .await
        .expect("slow upstream should hit the stream timeout")
        .unwrap();

        assert_eq!(
            channel.sent_texts().await,
            vec![RelayError::Timeout(Duration::from_millis(100)).user_message()]
        );
    }

    #[tokio::test]
    async fn test_empty_reply_not_recorded_in_history() {
        let mut config = config();
        config.features.forward_history = true;
        let (ctx, channel, _) =
            setup_with(config, FakeBackend::new().with_chat_chunks(&["2:[{}]\n"]));

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        assert_eq!(channel.sent_texts().await, vec![EMPTY_RESPONSE_FALLBACK]);
        assert_eq!(ctx.history.as_ref().unwrap().len(99).await, 0);
    }

    #[tokio::test]
    async fn test_streaming_chat_disabled() {
        let mut config = config();
        config.features.streaming_chat = false;
        let (ctx, channel, backend) =
            setup_with(config, FakeBackend::new().with_chat_chunks(&["0:\"x\"\n"]));

        handle_message(&ctx, &create_message("hello")).await.unwrap();

        assert_eq!(channel.sent_texts().await, vec![CHAT_DISABLED_TEXT]);
        assert!(backend.chat_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_forwarded_when_enabled() {
        let mut config = config();
        config.features.forward_history = true;
        let (ctx, _, backend) =
            setup_with(config, FakeBackend::new().with_chat_chunks(&["0:\"pong\"\n"]));

        handle_message(&ctx, &create_message("ping")).await.unwrap();
        handle_message(&ctx, &create_message("again")).await.unwrap();

        let calls = backend.chat_calls.lock().unwrap();
        assert_eq!(calls[0].messages.len(), 1);
        let second: Vec<(ChatRole, &str)> = calls[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            second,
            vec![
                (ChatRole::User, "ping"),
                (ChatRole::Assistant, "pong"),
                (ChatRole::User, "again"),
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_bypass_connection_check() {
        let (ctx, channel, backend) = setup(FakeBackend::new());

        handle_message(&ctx, &create_message("/verify")).await.unwrap();
        handle_message(&ctx, &create_message("/help@TaskGenieBot"))
            .await
            .unwrap();

        assert_eq!(
            channel.sent_texts().await,
            vec![VERIFY_USAGE_TEXT, HELP_TEXT]
        );
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_message_ignored() {
        let (ctx, channel, backend) = setup(FakeBackend::new());

        handle_message(&ctx, &create_message("  ")).await.unwrap();

        assert!(channel.sent_texts().await.is_empty());
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_polling_dispatches_until_cancelled() {
        let channel = Arc::new(MockChannel::new().with_inbound(vec![
            create_message("/help"),
            create_message("/start"),
        ]));
        let ctx = Arc::new(RelayContext::new(
            config(),
            channel.clone(),
            Arc::new(FakeBackend::new()),
        ));

        let handle = tokio::spawn(run_polling(ctx.clone()));

        let mut attempts = 0;
        while channel.sent_texts().await.len() < 2 && attempts < 100 {
            sleep(Duration::from_millis(10)).await;
            attempts += 1;
        }
        assert_eq!(channel.sent_texts().await.len(), 2);

        ctx.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("polling loop should stop on cancel")
            .unwrap();
    }
}

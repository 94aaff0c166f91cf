//! Health and Telegram webhook routes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::WebhookReceiver;
use crate::relay::{RelayContext, spawn_message};

use super::error::ApiError;

/// Header Telegram echoes the webhook `secret_token` in
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

pub const SERVICE_NAME: &str = "genie-relay";

/// Shared state for the HTTP routes
#[derive(Clone)]
pub struct ServerState {
    pub ctx: Arc<RelayContext>,
    /// Parses webhook payloads and checks their secret
    pub receiver: Arc<dyn WebhookReceiver>,
}

impl ServerState {
    pub fn new(ctx: Arc<RelayContext>, receiver: Arc<dyn WebhookReceiver>) -> Self {
        Self { ctx, receiver }
    }
}

/// Create the relay router
pub fn build_router(state: ServerState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(webhook_path, post(receive_update))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

/// Accept one Telegram update; each message in it is handled on its own task.
async fn receive_update(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let provided = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    if !state.receiver.verify_secret(provided) {
        warn!("Webhook request rejected: bad secret token");
        return Err(ApiError::unauthorized("invalid secret token"));
    }

    let messages = state.receiver.handle_webhook(&body).await.map_err(|e| {
        warn!(error = %e, "Invalid webhook payload");
        ApiError::bad_request(format!("invalid update: {}", e))
    })?;

    debug!(count = messages.len(), "Webhook update received");
    for message in messages {
        spawn_message(state.ctx.clone(), message);
    }

    Ok(Json(json!({ "ok": true })))
}

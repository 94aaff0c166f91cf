//! Wire the Telegram channel, backend client and HTTP server together and run
//! until a shutdown signal arrives.

use anyhow::{Context, Result};
use genie_relay_core::channel::{TelegramChannel, TelegramConfig};
use genie_relay_core::relay::{BackendEndpoints, HttpBackend, run_polling};
use genie_relay_core::server::{HttpServer, ServerState};
use genie_relay_core::{DeliveryMode, RelayConfig, RelayContext};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(config: RelayConfig) -> Result<()> {
    let mut telegram_config = TelegramConfig::new(config.bot_token.clone());
    if let Some(secret) = &config.webhook_secret {
        telegram_config = telegram_config.with_webhook_secret(secret.clone());
    }
    let telegram = Arc::new(TelegramChannel::new(telegram_config));

    let me = telegram
        .test_connection()
        .await
        .context("Failed to reach the Telegram Bot API")?;
    info!(username = ?me.username, "Connected to Telegram");

    let endpoints = BackendEndpoints::new(&config.verify_endpoint, &config.ai_chat_endpoint);
    info!(
        verify = %endpoints.verify_url,
        check_connection = %endpoints.check_connection_url,
        chat = %endpoints.chat_url,
        "Backend endpoints"
    );
    let backend = Arc::new(HttpBackend::new(endpoints)?);

    let cancel = CancellationToken::new();
    let ctx = Arc::new(
        RelayContext::new(config.clone(), telegram.clone(), backend).with_cancel(cancel.clone()),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            cancel.cancel();
            let _ = shutdown_tx.send(());
        });
    }

    let server = HttpServer::new(
        config.listen_addr(),
        config.webhook_path.clone(),
        ServerState::new(ctx.clone(), telegram.clone()),
    );

    match config.delivery_mode() {
        DeliveryMode::Webhook { url } => {
            telegram
                .set_webhook(&url)
                .await
                .context("Failed to register the Telegram webhook")?;
            info!("Telegram bot started in webhook mode");
            server.run(shutdown_rx).await?;
        }
        DeliveryMode::Polling => {
            telegram
                .delete_webhook()
                .await
                .context("Failed to remove the Telegram webhook")?;
            let poller = tokio::spawn(run_polling(ctx.clone()));
            info!("Telegram bot started in polling mode");

            let result = server.run(shutdown_rx).await;
            cancel.cancel();
            telegram.stop_polling();
            if let Err(e) = poller.await {
                warn!(error = %e, "Polling task ended abnormally");
            }
            result?;
        }
    }

    info!("Telegram bot stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

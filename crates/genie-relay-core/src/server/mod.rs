//! HTTP server: health probe and the Telegram webhook endpoint.

mod error;
mod routes;

pub use error::ApiError;
pub use routes::{SECRET_TOKEN_HEADER, SERVICE_NAME, ServerState, build_router};

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP server for the relay
pub struct HttpServer {
    addr: String,
    webhook_path: String,
    state: ServerState,
}

impl HttpServer {
    pub fn new(addr: impl Into<String>, webhook_path: impl Into<String>, state: ServerState) -> Self {
        Self {
            addr: addr.into(),
            webhook_path: webhook_path.into(),
            state,
        }
    }

    fn build_router(&self) -> Router {
        build_router(self.state.clone(), &self.webhook_path).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let app = self.build_router();
        info!(
            addr = %listener.local_addr()?,
            webhook_path = %self.webhook_path,
            "HTTP server listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}

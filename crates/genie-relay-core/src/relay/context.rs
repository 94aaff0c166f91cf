//! Application context shared by every handler.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::backend::Backend;
use super::history::ConversationHistory;
use crate::channel::Channel;
use crate::config::RelayConfig;

/// Built once at startup and handed to each message task.
pub struct RelayContext {
    pub config: RelayConfig,
    pub channel: Arc<dyn Channel>,
    pub backend: Arc<dyn Backend>,
    /// Present only when history forwarding is enabled
    pub history: Option<ConversationHistory>,
    /// Fired on shutdown; aborts in-flight upstream reads
    pub cancel: CancellationToken,
}

impl RelayContext {
    pub fn new(config: RelayConfig, channel: Arc<dyn Channel>, backend: Arc<dyn Backend>) -> Self {
        let history = config
            .features
            .forward_history
            .then(|| ConversationHistory::new(config.features.history_turns));
        Self {
            config,
            channel,
            backend,
            history,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

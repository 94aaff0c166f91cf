//! Error types for the relay

use std::time::Duration;
use thiserror::Error;

/// Apology sent for any failed AI round trip.
pub const GENERIC_APOLOGY: &str = "❌ Sorry, I encountered an error processing your message. Please try again or rephrase your request.";

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Upstream stream timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream stream cancelled")]
    Cancelled,

    #[error("Channel error: {0}")]
    Channel(String),
}

impl RelayError {
    /// Chat reply for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout(_) => {
                "⏳ Sorry, the assistant took too long to respond. Please try again in a moment."
            }
            _ => GENERIC_APOLOGY,
        }
    }

    /// Whether the failure should be reported back to the user.
    ///
    /// Cancellation only happens on shutdown, so nobody is waiting for a reply.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_has_own_wording() {
        let err = RelayError::Timeout(Duration::from_secs(5));
        assert!(err.user_message().contains("too long"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_upstream_status_uses_generic_apology() {
        let err = RelayError::UpstreamStatus {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.user_message(), GENERIC_APOLOGY);
        assert_eq!(err.to_string(), "Upstream returned 502: bad gateway");
    }

    #[test]
    fn test_cancelled_is_not_reportable() {
        assert!(!RelayError::Cancelled.is_reportable());
        assert!(RelayError::Stream("reset".to_string()).is_reportable());
    }
}

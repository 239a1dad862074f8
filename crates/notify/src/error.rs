//! Error types for chat channels.

use thiserror::Error;

/// Errors that can occur when talking to a chat service.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed (includes timeouts)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The API answered but refused the call (`ok: false`)
    #[error("{method} failed: {error}")]
    Api { method: &'static str, error: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Whether the service rejected our credentials.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Api { error, .. }
                if matches!(error.as_str(), "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked")
        )
    }
}

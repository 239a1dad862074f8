//! Error types for ticket trackers.

use thiserror::Error;

/// Errors that can occur when creating a ticket.
#[derive(Debug, Error)]
pub enum TicketError {
    /// Tracker is missing credentials or project settings
    #[error("Ticket tracker not configured: {0}")]
    NotConfigured(String),

    /// Credentials were rejected (401)
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Credentials are valid but lack permission for the project (403)
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Tracker refused the request, e.g. unknown project or issue type
    #[error("Tracker returned {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Transport failure
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// Response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TicketError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

impl TicketError {
    /// Whether the tracker rejected our credentials or permissions.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }
}

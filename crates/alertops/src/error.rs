//! Error types for the store and the lifecycle engine.

use thiserror::Error;

use crate::model::AlertStatus;

/// Errors from the alert record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A ticket key was already recorded
    #[error("Ticket {0} is already recorded")]
    DuplicateTicket(String),

    /// A row holds a value this build does not understand
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The writer lock was poisoned by a panic
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Alert {0} not found")]
    NotFound(String),

    /// Manual transition outside the allowed table
    #[error("Cannot move alert from {from} to {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Alert {alert_id} already has ticket {ticket_key}")]
    AlreadyTicketed { alert_id: String, ticket_key: String },

    /// A ticket call for this signature is already in flight
    #[error("Ticket for alert {alert_id} is already being created by {holder}")]
    TicketPending { alert_id: String, holder: String },

    /// Resolved alerts only accept history rows
    #[error("Alert {0} is resolved")]
    Immutable(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Ticket creation was requested explicitly and failed
    #[error("Ticket creation failed: {0}")]
    Ticket(#[from] ticketing::TicketError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

//! Alert lifecycle engine.
//!
//! Turns Alertmanager notifications into uniquely identified, idempotently
//! ticketed, assignable alert records:
//!
//! - **Dedup**: alerts are keyed by `{alertname}_{instance}`. A re-fire while
//!   the incident's ticket is open becomes a restatement sharing that ticket.
//! - **Ticketing**: new incidents open a Jira ticket. `ticket_key` is unique
//!   in the store, so a lost race becomes a restatement, never a second ticket.
//! - **Chat**: each incident is posted to Slack and the message is edited in
//!   place as the alert is claimed or resolved.
//! - **Assignment**: the first claim reaction on the message assigns the
//!   alert; later claims are recorded as "also reacted".
//!
//! Every mutation of an alert and its history row are written in one SQLite
//! transaction. Collaborator failures are recorded in history and never fail
//! an ingestion.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arbitrator;
pub mod assignment;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod server;
pub mod store;

pub use arbitrator::TicketArbitrator;
pub use assignment::{AssignmentHandler, IgnoreReason, ReactionOutcome};
pub use config::Config;
pub use dedup::DedupResolver;
pub use dispatcher::NotificationDispatcher;
pub use engine::{BatchReport, IngestOutcome, LifecycleEngine, StatusUpdate};
pub use error::{EngineError, StoreError};
pub use model::{Alert, AlertStatus, HistoryAction, HistoryEntry};
pub use store::AlertStore;

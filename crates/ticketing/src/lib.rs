//! Ticket trackers for alert incidents.
//!
//! A tracker turns a [`TicketRequest`] into an external ticket and hands back a
//! [`TicketRef`] (key plus browse URL). Trackers never retry on their own: a
//! failed create is reported to the caller, who decides whether the next
//! occurrence of the incident should try again.
//!
//! # Usage
//!
//! ```no_run
//! use ticketing::{JiraTracker, Priority, TicketRequest, TicketTracker};
//!
//! # async fn example() -> Result<(), ticketing::TicketError> {
//! let jira = JiraTracker::from_env();
//! let request = TicketRequest::new("[CRITICAL] DiskSpaceHigh - db1:9100", "Disk is full")
//!     .with_labels(["alert-DiskSpaceHigh", "severity-critical"])
//!     .with_priority(Priority::High);
//!
//! let ticket = jira.create_ticket(&request).await?;
//! println!("{} -> {}", ticket.key, ticket.url);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! - `JIRA_URL`, `JIRA_USERNAME`, `JIRA_API_TOKEN`: instance and credentials
//! - `JIRA_PROJECT`: project key (default `DCOPS`)
//! - `JIRA_ISSUE_TYPE`: issue type name (default `Task`)
//! - `JIRA_ASSIGNEE`: optional default assignee
//! - `JIRA_TIMEOUT_SECS`: request timeout (default 30)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod jira;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::TicketError;
pub use jira::{JiraConfig, JiraTracker};

/// Characters not allowed in a tracker label.
static LABEL_INVALID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_-]").unwrap());

/// Ticket priority, named the way Jira names its default scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
}

impl Priority {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to put in a new ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    /// One-line summary
    pub summary: String,
    /// Long-form description (tracker markup)
    pub description: String,
    /// Labels, sanitized by the tracker before sending
    #[serde(default)]
    pub labels: Vec<String>,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Project override; the tracker's configured project when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
}

impl TicketRequest {
    #[must_use]
    pub fn new(summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            description: description.into(),
            labels: Vec::new(),
            priority: Priority::default(),
            project_key: None,
        }
    }

    #[must_use]
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_project(mut self, project_key: impl Into<String>) -> Self {
        self.project_key = Some(project_key.into());
        self
    }
}

/// A created ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketRef {
    /// Tracker key, e.g. `DCOPS-123`
    pub key: String,
    /// Browse URL for humans
    pub url: String,
}

/// Trait for external ticket trackers.
#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// Get the name of this tracker.
    fn name(&self) -> &'static str;

    /// Check if this tracker has everything it needs to create tickets.
    fn enabled(&self) -> bool;

    /// Create a ticket.
    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketRef, TicketError>;
}

/// Lowercase a label and replace anything outside `[a-z0-9_-]` with `-`.
///
/// Returns `None` when nothing usable is left.
#[must_use]
pub fn sanitize_label(label: &str) -> Option<String> {
    let lowered = label.to_lowercase();
    let cleaned = LABEL_INVALID.replace_all(&lowered, "-");
    let trimmed = cleaned.trim_matches('-');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

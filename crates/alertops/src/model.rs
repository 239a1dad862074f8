//! Alert lifecycle data model and the inbound Alertmanager payload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use notify::{MessageRef as NotificationRef, Severity};
pub use ticketing::TicketRef;

/// Placeholder used when an alert carries no `instance` label.
pub const UNKNOWN_INSTANCE: &str = "unknown";

/// Stored status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Assigned,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub const ALL: [Self; 4] = [
        Self::Firing,
        Self::Assigned,
        Self::Acknowledged,
        Self::Resolved,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Assigned => "assigned",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Whether an operator may move an alert from `self` to `next`.
    ///
    /// `assigned -> assigned` is a reassignment. `resolved` is terminal.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Firing,
                Self::Assigned | Self::Acknowledged | Self::Resolved
            ) | (
                Self::Assigned,
                Self::Assigned | Self::Acknowledged | Self::Firing | Self::Resolved
            ) | (Self::Acknowledged, Self::Assigned | Self::Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown alert status '{s}'"))
    }
}

/// How an assignment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    SlackReaction,
    Manual,
}

impl AssignmentMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SlackReaction => "slack_reaction",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "slack_reaction" => Some(Self::SlackReaction),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Who owns an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Chat user id, or operator-supplied identity for manual assignments
    pub assignee_id: String,
    /// Human readable name, the id when no name could be resolved
    pub assignee_name: String,
    pub assigned_at: DateTime<Utc>,
    pub method: AssignmentMethod,
    /// Claim emoji used, for reaction assignments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// The central lifecycle record. One row per ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub signature: String,
    pub name: String,
    pub instance: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Alert document as received, kept for audit
    pub raw_payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    pub ticket: Option<TicketRef>,
    pub notification: Option<NotificationRef>,
    pub assignment: Option<Assignment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.annotations.get("summary").map(String::as_str)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.annotations.get("description").map(String::as_str)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.status.is_resolved()
    }
}

/// Kinds of history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// New incident persisted
    Created,
    /// Re-ingestion sharing an open incident's ticket
    Restated,
    TicketCreated,
    TicketFailed,
    /// Ticket creation lost a uniqueness race and adopted the winner's ticket
    TicketRestated,
    /// Another ingestion held the signature lease past the wait bound
    TicketDeferred,
    /// A ticket was created but the alert could no longer take it
    TicketOrphaned,
    Notified,
    NotificationFailed,
    Assigned,
    AlsoReacted,
    Unassigned,
    MessageUpdateFailed,
    Resolved,
    StatusChanged,
}

impl HistoryAction {
    pub const ALL: [Self; 15] = [
        Self::Created,
        Self::Restated,
        Self::TicketCreated,
        Self::TicketFailed,
        Self::TicketRestated,
        Self::TicketDeferred,
        Self::TicketOrphaned,
        Self::Notified,
        Self::NotificationFailed,
        Self::Assigned,
        Self::AlsoReacted,
        Self::Unassigned,
        Self::MessageUpdateFailed,
        Self::Resolved,
        Self::StatusChanged,
    ];

    /// Actions that record a collaborator failure.
    pub const FAILURES: [Self; 3] = [
        Self::TicketFailed,
        Self::NotificationFailed,
        Self::MessageUpdateFailed,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Restated => "restated",
            Self::TicketCreated => "ticket_created",
            Self::TicketFailed => "ticket_failed",
            Self::TicketRestated => "ticket_restated",
            Self::TicketDeferred => "ticket_deferred",
            Self::TicketOrphaned => "ticket_orphaned",
            Self::Notified => "notified",
            Self::NotificationFailed => "notification_failed",
            Self::Assigned => "assigned",
            Self::AlsoReacted => "also_reacted",
            Self::Unassigned => "unassigned",
            Self::MessageUpdateFailed => "message_update_failed",
            Self::Resolved => "resolved",
            Self::StatusChanged => "status_changed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == s)
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub data: serde_json::Value,
}

/// Lifecycle of an external ticket as seen from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Resolved,
    /// Created in the tracker but attached to no alert
    Orphaned,
}

impl TicketStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Orphaned => "orphaned",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// One row per externally created ticket. `ticket_key` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub alert_id: String,
    pub ticket_key: String,
    pub ticket_url: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

/// Host metrics sample for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: serde_json::Value,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
}

fn default_metric_type() -> String {
    "system".to_string()
}

// =============================================================================
// Inbound payloads
// =============================================================================

/// Alertmanager webhook payload.
///
/// Alerts are kept as raw JSON so that one malformed alert can be rejected
/// without failing the whole batch.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    pub alerts: Vec<serde_json::Value>,
}

/// Status carried by an inbound alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawAlertStatus {
    Firing,
    Resolved,
}

/// Individual alert from Alertmanager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlert {
    pub status: RawAlertStatus,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl RawAlert {
    /// Decode and validate one alert document.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        let alert: Self = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if alert.name().is_none() {
            return Err("missing alertname label".to_string());
        }
        Ok(alert)
    }

    /// The `alertname` label, when present and non-blank.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.labels
            .get("alertname")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// The `instance` label, or [`UNKNOWN_INSTANCE`].
    #[must_use]
    pub fn instance(&self) -> &str {
        self.labels
            .get("instance")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_INSTANCE)
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.labels
            .get("severity")
            .map_or(Severity::Unknown, |s| Severity::from_label(s))
    }

    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == RawAlertStatus::Firing
    }
}

/// Inbound chat reaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    /// `reaction_added` or `reaction_removed`
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub user: String,
    pub reaction: String,
    pub item: ReactionItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    ReactionAdded,
    ReactionRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionItem {
    #[serde(default)]
    pub channel: String,
    #[serde(rename = "ts")]
    pub message_ts: String,
}

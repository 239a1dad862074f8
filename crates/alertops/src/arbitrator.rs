//! Ticket arbitration: build the ticket content for an alert, call the
//! tracker and record what happened.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use ticketing::{sanitize_label, Priority, TicketError, TicketRequest, TicketTracker};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::model::{Alert, HistoryAction, Severity, TicketRecord, TicketRef, TicketStatus};
use crate::store::{alerts, claims, history, tickets, AlertStore};

/// Remediation hint family, picked from the alert name and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    DiskHealth,
    Disk,
    Memory,
    Cpu,
    Network,
    ServiceDown,
    Generic,
}

impl AlertKind {
    #[must_use]
    pub fn classify(alert: &Alert) -> Self {
        let mut haystack = alert.name.to_lowercase();
        for key in ["job", "device", "mountpoint", "service"] {
            if let Some(value) = alert.labels.get(key) {
                haystack.push(' ');
                haystack.push_str(&value.to_lowercase());
            }
        }
        let has = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

        if has(&["smart", "disk_health", "diskhealth", "reallocated"]) {
            Self::DiskHealth
        } else if has(&["disk", "storage", "filesystem", "inode", "volume", "mountpoint"]) {
            Self::Disk
        } else if has(&["memory", "oom", "swap"]) {
            Self::Memory
        } else if has(&["cpu", "load"]) {
            Self::Cpu
        } else if has(&["network", "interface", "packet", "latency", "nic"]) {
            Self::Network
        } else if has(&["down", "unreachable", "unavailable", "offline"]) {
            Self::ServiceDown
        } else {
            Self::Generic
        }
    }

    #[must_use]
    pub const fn hints(&self) -> &'static [&'static str] {
        match self {
            Self::DiskHealth => &[
                "Run `smartctl -a <device>` and check reallocated and pending sector counts",
                "Confirm recent backups of data on the affected disk",
                "Schedule a replacement if the drive reports pre-failure attributes",
            ],
            Self::Disk => &[
                "Check usage with `df -h` and `du -sh /* | sort -h`",
                "Clean up old logs, rotated archives and temporary files",
                "Extend the volume or move data if growth is expected",
            ],
            Self::Memory => &[
                "Identify top consumers with `ps aux --sort=-%mem | head`",
                "Look for OOM killer activity in `dmesg` and the journal",
                "Restart leaking services or raise memory limits",
            ],
            Self::Cpu => &[
                "Identify hot processes with `top` or `pidstat`",
                "Check for runaway jobs or unexpected traffic spikes",
                "Rebalance load or add capacity if sustained",
            ],
            Self::Network => &[
                "Check link state and error counters with `ip -s link`",
                "Test reachability and latency to upstream gateways",
                "Review recent switch, firewall or routing changes",
            ],
            Self::ServiceDown => &[
                "Check the service with `systemctl status` and recent logs",
                "Verify the host is reachable and the exporter is running",
                "Restart the service and confirm the alert clears",
            ],
            Self::Generic => &[
                "Review the alert labels and annotations for context",
                "Check recent deployments or configuration changes on the host",
                "Escalate to the owning team if the cause is unclear",
            ],
        }
    }
}

/// Tracker priority for an alert severity.
#[must_use]
pub const fn priority_for(severity: Severity) -> Priority {
    match severity {
        Severity::Critical => Priority::High,
        Severity::Warning => Priority::Medium,
        Severity::Info => Priority::Low,
        Severity::Unknown => Priority::Medium,
    }
}

/// Deterministic ticket content for an alert.
#[must_use]
pub fn ticket_request(alert: &Alert, received_at: DateTime<Utc>) -> TicketRequest {
    let summary = format!(
        "[{}] {} - {}",
        alert.severity.as_str().to_uppercase(),
        alert.name,
        alert.instance
    );

    let mut lines = vec![
        "*Alert Details:*".to_string(),
        format!("• Alert Name: {}", alert.name),
        format!("• Severity: {}", alert.severity),
        format!("• Instance: {}", alert.instance),
        format!("• Status: {}", alert.status),
        format!("• Received At: {}", received_at.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        "*Alert Information:*".to_string(),
        format!("• Summary: {}", alert.summary().unwrap_or("N/A")),
        format!("• Description: {}", alert.description().unwrap_or("N/A")),
        format!("• Started At: {}", alert.starts_at.as_deref().unwrap_or("N/A")),
    ];
    if !alert.labels.is_empty() {
        lines.push("• Labels:".to_string());
        lines.extend(alert.labels.iter().map(|(key, value)| format!("  - {key}: {value}")));
    }
    lines.push(String::new());
    lines.push("*Remediation Hints:*".to_string());
    lines.extend(AlertKind::classify(alert).hints().iter().map(|hint| format!("• {hint}")));
    let description = lines.join("\n");

    let labels = [
        format!("alert-{}", alert.name),
        format!("severity-{}", alert.severity),
    ]
    .iter()
    .filter_map(|label| sanitize_label(label))
    .collect::<Vec<_>>();

    TicketRequest::new(summary, description)
        .with_labels(labels)
        .with_priority(priority_for(alert.severity))
}

/// Result of one arbitration.
#[derive(Debug)]
pub struct Arbitration {
    /// Whether this call created a ticket and attached it to the alert
    pub ticket_created: bool,
    /// Ticket the alert now refers to
    pub ticket: Option<TicketRef>,
    /// Tracker failure, already recorded in history
    pub error: Option<TicketError>,
}

/// Opens tickets for new incidents.
pub struct TicketArbitrator {
    tracker: Arc<dyn TicketTracker>,
}

impl TicketArbitrator {
    #[must_use]
    pub fn new(tracker: Arc<dyn TicketTracker>) -> Self {
        Self { tracker }
    }

    #[must_use]
    pub fn tracker(&self) -> &dyn TicketTracker {
        self.tracker.as_ref()
    }

    /// Create a ticket for `alert` and record the outcome.
    ///
    /// The tracker call runs outside any transaction. Afterwards, in one
    /// transaction, the ticket is recorded (or the failure written to history)
    /// and the signature lease held by `alert` is released. A ticket key that
    /// is already recorded turns into a restatement of its owner.
    pub async fn open_ticket(
        &self,
        store: &AlertStore,
        alert: &Alert,
        actor: Option<&str>,
    ) -> Result<Arbitration, StoreError> {
        let request = ticket_request(alert, Utc::now());
        let result = self.tracker.create_ticket(&request).await;
        let now = Utc::now();

        match result {
            Ok(ticket) => store.write(|tx| {
                let arbitration = record_ticket(tx, alert, &ticket, actor, now)?;
                claims::release(tx, &alert.signature, &alert.alert_id)?;
                Ok(arbitration)
            }),
            Err(err) => {
                error!(
                    alert_id = %alert.alert_id,
                    signature = %alert.signature,
                    tracker = self.tracker.name(),
                    error = %err,
                    "Ticket creation failed"
                );
                store.write(|tx| {
                    history::append(
                        tx,
                        &alert.alert_id,
                        HistoryAction::TicketFailed,
                        actor,
                        &json!({
                            "tracker": self.tracker.name(),
                            "error": err.to_string(),
                            "auth": err.is_auth(),
                        }),
                        now,
                    )?;
                    claims::release(tx, &alert.signature, &alert.alert_id)?;
                    Ok(())
                })?;
                Ok(Arbitration {
                    ticket_created: false,
                    ticket: None,
                    error: Some(err),
                })
            }
        }
    }
}

fn record_ticket(
    conn: &rusqlite::Connection,
    alert: &Alert,
    ticket: &TicketRef,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Arbitration, StoreError> {
    let record = TicketRecord {
        alert_id: alert.alert_id.clone(),
        ticket_key: ticket.key.clone(),
        ticket_url: ticket.url.clone(),
        status: TicketStatus::Open,
        created_at: now,
    };

    match tickets::insert(conn, &record) {
        Ok(()) => {}
        Err(StoreError::DuplicateTicket(key)) => {
            let owner = tickets::find_by_key(conn, &key)?;
            let owner_id = owner.as_ref().map(|r| r.alert_id.clone());
            let adopted = owner.map_or_else(
                || ticket.clone(),
                |r| TicketRef {
                    key: r.ticket_key,
                    url: r.ticket_url,
                },
            );
            warn!(
                alert_id = %alert.alert_id,
                ticket_key = %key,
                owner = ?owner_id,
                "Ticket key already recorded, treating as restatement"
            );
            let ticket = match attach(conn, alert, &adopted, now)? {
                Attachment::Attached => {
                    history::append(
                        conn,
                        &alert.alert_id,
                        HistoryAction::TicketRestated,
                        actor,
                        &json!({"ticket_key": adopted.key, "restates": owner_id}),
                        now,
                    )?;
                    Some(adopted)
                }
                Attachment::Refused { current, reason } => {
                    debug!(alert_id = %alert.alert_id, reason, "Restated ticket not attached");
                    current
                }
            };
            return Ok(Arbitration {
                ticket_created: false,
                ticket,
                error: None,
            });
        }
        Err(e) => return Err(e),
    }

    match attach(conn, alert, ticket, now)? {
        Attachment::Attached => {
            history::append(
                conn,
                &alert.alert_id,
                HistoryAction::TicketCreated,
                actor,
                &json!({"ticket_key": ticket.key, "ticket_url": ticket.url}),
                now,
            )?;
            info!(alert_id = %alert.alert_id, ticket_key = %ticket.key, "Ticket recorded");
            Ok(Arbitration {
                ticket_created: true,
                ticket: Some(ticket.clone()),
                error: None,
            })
        }
        Attachment::Refused { current, reason } => {
            tickets::set_status(conn, &ticket.key, TicketStatus::Orphaned)?;
            history::append(
                conn,
                &alert.alert_id,
                HistoryAction::TicketOrphaned,
                actor,
                &json!({
                    "ticket_key": ticket.key,
                    "ticket_url": ticket.url,
                    "current_ticket_key": current.as_ref().map(|t| &t.key),
                    "reason": reason,
                }),
                now,
            )?;
            warn!(
                alert_id = %alert.alert_id,
                ticket_key = %ticket.key,
                reason,
                "Created ticket could not be attached"
            );
            Ok(Arbitration {
                ticket_created: false,
                ticket: current,
                error: None,
            })
        }
    }
}

/// Outcome of attaching a ticket to the stored alert.
enum Attachment {
    Attached,
    /// The alert kept `current`; `reason` says why.
    Refused {
        current: Option<TicketRef>,
        reason: &'static str,
    },
}

/// Set `ticket` on the alert unless it was resolved or ticketed in the meantime.
fn attach(
    conn: &rusqlite::Connection,
    alert: &Alert,
    ticket: &TicketRef,
    now: DateTime<Utc>,
) -> Result<Attachment, StoreError> {
    let Some(current) = alerts::get(conn, &alert.alert_id)? else {
        return Ok(Attachment::Refused {
            current: None,
            reason: "missing",
        });
    };
    if current.status.is_resolved() {
        return Ok(Attachment::Refused {
            current: current.ticket,
            reason: "resolved",
        });
    }
    if alerts::set_ticket(conn, &alert.alert_id, ticket, now)? {
        return Ok(Attachment::Attached);
    }
    Ok(Attachment::Refused {
        current: current.ticket,
        reason: "already_ticketed",
    })
}

//! The lifecycle engine: ties dedup, ticketing, notification and assignment
//! together and owns every state transition of an alert.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{ChatChannel, SlackChannel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ticketing::{JiraTracker, TicketRef, TicketTracker};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::arbitrator::TicketArbitrator;
use crate::assignment::{AssignmentHandler, ReactionOutcome};
use crate::config::Config;
use crate::dedup::{signature, Admission, DedupResolver};
use crate::dispatcher::NotificationDispatcher;
use crate::error::{EngineError, StoreError};
use crate::model::{
    Alert, AlertStatus, AlertmanagerPayload, Assignment, AssignmentMethod, HistoryAction,
    HistoryEntry, MetricSnapshot, RawAlert, ReactionEvent, TicketStatus,
};
use crate::store::claims::{self, LeaseOutcome};
use crate::store::{alerts, history, metrics, tickets, AlertFilter, AlertStats, AlertStore};

/// Upper bound on metric snapshots returned by one query.
const METRICS_LIMIT: usize = 1000;

/// What ingesting one alert did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// New incident. `ticket` is absent when the tracker call failed.
    Created {
        alert_id: String,
        signature: String,
        ticket: Option<TicketRef>,
        ticket_created: bool,
        notified: bool,
    },
    /// Re-ingestion of an open, ticketed incident.
    Restated {
        alert_id: String,
        signature: String,
        owner_id: String,
        ticket: Option<TicketRef>,
    },
    /// Persisted without a ticket after waiting out another ingestion's lease.
    Deferred { alert_id: String, signature: String },
    /// Resolution notice. Empty `alert_ids` means nothing was open.
    Resolved {
        signature: String,
        alert_ids: Vec<String>,
    },
}

/// An alert in a batch that was not processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAlert {
    pub index: usize,
    pub reason: String,
}

/// Per-batch ingestion report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub processed: Vec<IngestOutcome>,
    /// Malformed alerts, dropped without touching the store
    pub rejected: Vec<SkippedAlert>,
    /// Alerts lost to a storage failure
    pub failed: Vec<SkippedAlert>,
}

impl BatchReport {
    #[must_use]
    pub fn storage_failed(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Operator override of an alert's status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusUpdate {
    pub status: AlertStatus,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Required when moving to `assigned`
    #[serde(default)]
    pub assignee: Option<String>,
}

/// One alert with its full history, newest entry first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDetail {
    pub alert: Alert,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollaboratorHealth {
    pub name: &'static str,
    pub configured: bool,
}

/// Service health, including collaborator failures seen recently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: bool,
    pub ticketing: CollaboratorHealth,
    pub chat: CollaboratorHealth,
    /// Failure history rows per action over the last hour
    pub failures_last_hour: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

/// Coordinates the alert lifecycle over one store.
pub struct LifecycleEngine {
    store: Arc<AlertStore>,
    dedup: DedupResolver,
    arbitrator: TicketArbitrator,
    dispatcher: Arc<NotificationDispatcher>,
    assignment: AssignmentHandler,
    claim_wait: Duration,
    claim_poll: Duration,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<AlertStore>,
        tracker: Arc<dyn TicketTracker>,
        channel: Arc<dyn ChatChannel>,
        config: &Config,
    ) -> Self {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            channel,
            config.slack.channel_id.clone(),
            config.assignment.claim_emojis.first().cloned(),
        ));
        Self {
            store,
            dedup: DedupResolver::new(config.dedup.resolved_grace(), config.dedup.claim_ttl()),
            arbitrator: TicketArbitrator::new(tracker),
            assignment: AssignmentHandler::new(config.assignment.clone(), Arc::clone(&dispatcher)),
            dispatcher,
            claim_wait: config.dedup.claim_wait(),
            claim_poll: config.dedup.claim_poll(),
        }
    }

    /// Open the configured database and build the Jira and Slack collaborators.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store = Arc::new(AlertStore::open(&config.database.path)?);
        let tracker = Arc::new(JiraTracker::new(config.jira.clone()));
        let channel = Arc::new(SlackChannel::with_options(
            config.slack.bot_token.clone(),
            config.slack.channel_id.clone(),
            config.slack.api_base.clone(),
            config.slack.timeout(),
        ));
        Ok(Self::new(store, tracker, channel, config))
    }

    #[must_use]
    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Ingest an Alertmanager batch. Malformed alerts are rejected one by one;
    /// the rest of the batch is still processed.
    pub async fn ingest_batch(&self, payload: &AlertmanagerPayload) -> BatchReport {
        let mut report = BatchReport {
            received: payload.alerts.len(),
            ..BatchReport::default()
        };

        for (index, value) in payload.alerts.iter().enumerate() {
            let raw = match RawAlert::from_value(value) {
                Ok(raw) => raw,
                Err(reason) => {
                    warn!(index, reason = %reason, "Rejected malformed alert");
                    report.rejected.push(SkippedAlert { index, reason });
                    continue;
                }
            };

            match self.ingest(&raw, value).await {
                Ok(outcome) => report.processed.push(outcome),
                Err(e) => {
                    error!(index, error = %e, "Failed to store alert");
                    report.failed.push(SkippedAlert {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            received = report.received,
            processed = report.processed.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Processed alert batch"
        );
        report
    }

    /// Ingest one validated alert. Collaborator failures are recorded in
    /// history; only storage failures are returned.
    pub async fn ingest(
        &self,
        raw: &RawAlert,
        payload: &serde_json::Value,
    ) -> Result<IngestOutcome, StoreError> {
        if !raw.is_firing() {
            let sig = signature(raw.name().unwrap_or_default(), raw.instance());
            return self.resolve(&sig).await;
        }

        let deadline = Instant::now() + self.claim_wait;
        let mut alert = loop {
            match self
                .store
                .write(|tx| self.dedup.admit(tx, raw, payload, Utc::now()))?
            {
                Admission::NewIncident { alert } => break alert,
                Admission::Restated { alert, owner_id } => {
                    return Ok(IngestOutcome::Restated {
                        alert_id: alert.alert_id,
                        signature: alert.signature,
                        owner_id,
                        ticket: alert.ticket,
                    });
                }
                Admission::Busy { holder, since } => {
                    if Instant::now() >= deadline {
                        let alert = self
                            .store
                            .write(|tx| self.dedup.defer(tx, raw, payload, &holder, Utc::now()))?;
                        return Ok(IngestOutcome::Deferred {
                            alert_id: alert.alert_id,
                            signature: alert.signature,
                        });
                    }
                    debug!(holder = %holder, since = %since, "Waiting for ticket lease");
                    tokio::time::sleep(self.claim_poll).await;
                }
            }
        };

        let arbitration = self.arbitrator.open_ticket(&self.store, &alert, None).await?;
        alert.ticket.clone_from(&arbitration.ticket);
        let notified = self.dispatcher.notify(&self.store, &alert).await?.is_some();
        Ok(IngestOutcome::Created {
            alert_id: alert.alert_id,
            signature: alert.signature,
            ticket: arbitration.ticket,
            ticket_created: arbitration.ticket_created,
            notified,
        })
    }

    /// Resolve every open alert of `signature` and mark their tickets resolved.
    ///
    /// Ticket and notification references are kept. Chat messages are
    /// re-rendered as resolved, best effort.
    pub async fn resolve(&self, signature: &str) -> Result<IngestOutcome, StoreError> {
        let now = Utc::now();
        let resolved = self.store.write(|tx| {
            let open = alerts::open_for_signature(tx, signature)?;
            let mut resolved = Vec::with_capacity(open.len());
            for (i, alert) in open.into_iter().enumerate() {
                alerts::set_status(tx, &alert.alert_id, AlertStatus::Resolved, now)?;
                history::append(
                    tx,
                    &alert.alert_id,
                    HistoryAction::Resolved,
                    None,
                    &json!({
                        "signature": signature,
                        "previous_status": alert.status,
                        "cascade": i > 0,
                    }),
                    now,
                )?;
                if let Some(ticket) = &alert.ticket {
                    tickets::set_status(tx, &ticket.key, TicketStatus::Resolved)?;
                }
                if let Some(updated) = alerts::get(tx, &alert.alert_id)? {
                    resolved.push(updated);
                }
            }
            Ok(resolved)
        })?;

        if resolved.is_empty() {
            debug!(signature = %signature, "Resolution for signature with no open alert");
        } else {
            info!(signature = %signature, count = resolved.len(), "Resolved alerts");
        }

        for alert in &resolved {
            self.dispatcher.update(&self.store, alert).await?;
        }

        Ok(IngestOutcome::Resolved {
            signature: signature.to_string(),
            alert_ids: resolved.into_iter().map(|a| a.alert_id).collect(),
        })
    }

    pub async fn react(&self, event: &ReactionEvent) -> Result<ReactionOutcome, StoreError> {
        self.assignment.handle_reaction(&self.store, event).await
    }

    /// Operator override, validated against the transition table.
    ///
    /// `resolved -> resolved` is accepted and changes nothing.
    pub async fn manual_status_update(
        &self,
        alert_id: &str,
        update: StatusUpdate,
    ) -> Result<Alert, EngineError> {
        let actor = update.actor.trim();
        if actor.is_empty() {
            return Err(EngineError::Validation("actor is required".to_string()));
        }
        let assignee = update
            .assignee
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if update.status == AlertStatus::Assigned && assignee.is_none() {
            return Err(EngineError::Validation(
                "assignee is required to assign an alert".to_string(),
            ));
        }

        let now = Utc::now();
        let (alert, changed) = self.store.write(|tx| {
            let Some(current) = alerts::get(tx, alert_id)? else {
                return Ok(Err(EngineError::NotFound(alert_id.to_string())));
            };
            if current.status.is_resolved() {
                if !update.status.is_resolved() {
                    return Ok(Err(EngineError::Immutable(alert_id.to_string())));
                }
                history::append(
                    tx,
                    alert_id,
                    HistoryAction::StatusChanged,
                    Some(actor),
                    &json!({
                        "from": current.status,
                        "to": update.status,
                        "reason": update.reason,
                        "manual": true,
                        "noop": true,
                    }),
                    now,
                )?;
                return Ok(Ok((current, false)));
            }
            if !current.status.can_transition_to(update.status) {
                return Ok(Err(EngineError::InvalidTransition {
                    from: current.status,
                    to: update.status,
                }));
            }

            match (update.status, assignee) {
                (AlertStatus::Assigned, Some(assignee)) => {
                    let assignment = Assignment {
                        assignee_id: assignee.to_string(),
                        assignee_name: assignee.to_string(),
                        assigned_at: now,
                        method: AssignmentMethod::Manual,
                        emoji: None,
                    };
                    alerts::set_assignment(tx, alert_id, Some(&assignment), update.status, now)?;
                }
                (AlertStatus::Firing, _) => {
                    alerts::set_assignment(tx, alert_id, None, update.status, now)?;
                }
                (status, _) => alerts::set_status(tx, alert_id, status, now)?,
            }

            history::append(
                tx,
                alert_id,
                HistoryAction::StatusChanged,
                Some(actor),
                &json!({
                    "from": current.status,
                    "to": update.status,
                    "reason": update.reason,
                    "assignee": assignee,
                    "manual": true,
                }),
                now,
            )?;

            if update.status.is_resolved() {
                if let Some(ticket) = &current.ticket {
                    if alerts::open_for_signature(tx, &current.signature)?.is_empty() {
                        tickets::set_status(tx, &ticket.key, TicketStatus::Resolved)?;
                    }
                }
            }

            match alerts::get(tx, alert_id)? {
                Some(updated) => Ok(Ok((updated, true))),
                None => Ok(Err(EngineError::NotFound(alert_id.to_string()))),
            }
        })??;

        if changed {
            info!(
                alert_id = %alert_id,
                actor = %actor,
                status = %alert.status,
                "Manual status update"
            );
            self.dispatcher.update(&self.store, &alert).await?;
        }
        Ok(alert)
    }

    /// Create a ticket for an alert that has none, skipping the dedup check.
    ///
    /// The alert's signature lease is taken before the tracker call, so a
    /// concurrent request or an ingestion of the same signature gets
    /// [`EngineError::TicketPending`] instead of a second ticket.
    pub async fn create_ticket_now(&self, alert_id: &str, actor: &str) -> Result<Alert, EngineError> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(EngineError::Validation("actor is required".to_string()));
        }

        let ttl = self.dedup.lease_ttl();
        let alert = self.store.write(|tx| {
            let Some(alert) = alerts::get(tx, alert_id)? else {
                return Ok(Err(EngineError::NotFound(alert_id.to_string())));
            };
            if alert.status.is_resolved() {
                return Ok(Err(EngineError::Immutable(alert_id.to_string())));
            }
            if let Some(ticket) = &alert.ticket {
                return Ok(Err(EngineError::AlreadyTicketed {
                    alert_id: alert_id.to_string(),
                    ticket_key: ticket.key.clone(),
                }));
            }
            match claims::try_acquire(tx, &alert.signature, alert_id, Utc::now(), ttl)? {
                LeaseOutcome::Held { holder, .. } => Ok(Err(EngineError::TicketPending {
                    alert_id: alert_id.to_string(),
                    holder,
                })),
                _ => Ok(Ok(alert)),
            }
        })??;

        let arbitration = self
            .arbitrator
            .open_ticket(&self.store, &alert, Some(actor))
            .await?;
        if let Some(err) = arbitration.error {
            return Err(EngineError::Ticket(err));
        }

        let alert = self
            .store
            .read(|conn| alerts::get(conn, alert_id))?
            .ok_or_else(|| EngineError::NotFound(alert_id.to_string()))?;
        if arbitration.ticket_created {
            info!(
                alert_id = %alert_id,
                actor = %actor,
                ticket = ?alert.ticket.as_ref().map(|t| &t.key),
                "Manual ticket created"
            );
        } else {
            warn!(alert_id = %alert_id, actor = %actor, "Manual ticket was not attached");
        }
        self.dispatcher.update(&self.store, &alert).await?;
        Ok(alert)
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        self.store.read(|conn| alerts::list(conn, filter))
    }

    pub fn alert_with_history(&self, alert_id: &str) -> Result<AlertDetail, EngineError> {
        let detail = self.store.read(|conn| {
            let Some(alert) = alerts::get(conn, alert_id)? else {
                return Ok(None);
            };
            let history = history::for_alert(conn, alert_id)?;
            Ok(Some(AlertDetail { alert, history }))
        })?;
        detail.ok_or_else(|| EngineError::NotFound(alert_id.to_string()))
    }

    pub fn stats(&self) -> Result<AlertStats, StoreError> {
        self.store.read(|conn| alerts::stats(conn, Utc::now()))
    }

    pub fn health(&self) -> HealthReport {
        let now = Utc::now();
        let database = self.store.ping();
        let failures: BTreeMap<String, u64> = if database {
            self.store
                .read(|conn| {
                    history::count_since(conn, &HistoryAction::FAILURES, now - chrono::Duration::hours(1))
                })
                .map(|counts| {
                    counts
                        .into_iter()
                        .map(|(action, n)| (action.as_str().to_string(), n))
                        .collect()
                })
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to count recent failures");
                    BTreeMap::new()
                })
        } else {
            BTreeMap::new()
        };

        let status = if !database {
            HealthStatus::Unhealthy
        } else if failures.values().any(|n| *n > 0) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let tracker = self.arbitrator.tracker();
        let channel = self.dispatcher.channel();
        HealthReport {
            status,
            database,
            ticketing: CollaboratorHealth {
                name: tracker.name(),
                configured: tracker.enabled(),
            },
            chat: CollaboratorHealth {
                name: channel.name(),
                configured: channel.enabled(),
            },
            failures_last_hour: failures,
            timestamp: now,
        }
    }

    pub fn record_metrics(&self, snapshot: &MetricSnapshot) -> Result<i64, StoreError> {
        self.store.write(|tx| metrics::insert(tx, snapshot))
    }

    /// Snapshots from the last `hours`, newest first.
    pub fn metrics(
        &self,
        hours: u32,
        hostname: Option<&str>,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
        self.store
            .read(|conn| metrics::list(conn, since, hostname, METRICS_LIMIT))
    }
}

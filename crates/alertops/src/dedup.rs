//! Signature computation and the dedup decision.
//!
//! [`DedupResolver::admit`] must run inside a store write transaction: the
//! open-incident lookup, the lease check and the new alert row are one atomic
//! step, so two ingestions of the same signature can never both see "no open
//! incident" and both go on to create a ticket.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{Alert, AlertStatus, HistoryAction, RawAlert};
use crate::store::{alerts, claims, from_millis, history, LeaseOutcome};

/// Dedup key for an alert name and instance.
#[must_use]
pub fn signature(name: &str, instance: &str) -> String {
    format!("{name}_{instance}")
}

/// What the resolver found for a signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub signature: String,
    /// Most recent ticketed alert that still counts as open
    pub existing: Option<Alert>,
}

/// Result of admitting one inbound alert.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Persisted as a new row sharing `owner`'s ticket.
    Restated { alert: Alert, owner_id: String },
    /// Persisted as a new incident. The caller holds the signature lease and
    /// must open a ticket and then release it.
    NewIncident { alert: Alert },
    /// Another ingestion holds the lease. Nothing was written.
    Busy {
        holder: String,
        since: DateTime<Utc>,
    },
}

/// Computes signatures and decides new incident versus restatement.
#[derive(Debug, Clone)]
pub struct DedupResolver {
    resolved_grace: Duration,
    lease_ttl: Duration,
}

impl DedupResolver {
    #[must_use]
    pub fn new(resolved_grace: std::time::Duration, lease_ttl: std::time::Duration) -> Self {
        Self {
            resolved_grace: Duration::from_std(resolved_grace).unwrap_or_else(|_| Duration::zero()),
            lease_ttl: Duration::from_std(lease_ttl).unwrap_or_else(|_| Duration::seconds(120)),
        }
    }

    /// How long a signature lease stays live.
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Look up the open incident for `raw`'s signature.
    ///
    /// Only alerts with a ticket count: an alert whose ticket call failed must
    /// be retried by the next ingestion, not absorbed.
    pub fn resolve(
        &self,
        conn: &Connection,
        raw: &RawAlert,
        now: DateTime<Utc>,
    ) -> Result<Resolution, StoreError> {
        let name = raw.name().unwrap_or_default();
        let signature = signature(name, raw.instance());
        let resolved_since = (self.resolved_grace > Duration::zero()).then(|| now - self.resolved_grace);
        let existing = alerts::find_open_ticketed(conn, &signature, resolved_since)?;
        Ok(Resolution {
            signature,
            existing,
        })
    }

    /// Resolve `raw` and persist the resulting alert row with its history row.
    pub fn admit(
        &self,
        conn: &Connection,
        raw: &RawAlert,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        let resolution = self.resolve(conn, raw, now)?;
        let signature = resolution.signature;

        if let Some(owner) = resolution.existing {
            let mut alert = new_alert(conn, raw, payload, &signature, now)?;
            alert.ticket.clone_from(&owner.ticket);
            alerts::insert(conn, &alert)?;
            history::append(
                conn,
                &alert.alert_id,
                HistoryAction::Restated,
                None,
                &json!({
                    "restates": owner.alert_id,
                    "ticket_key": owner.ticket.as_ref().map(|t| &t.key),
                }),
                now,
            )?;
            debug!(signature = %signature, alert_id = %alert.alert_id, owner = %owner.alert_id, "Restatement");
            return Ok(Admission::Restated {
                alert,
                owner_id: owner.alert_id,
            });
        }

        let alert = new_alert(conn, raw, payload, &signature, now)?;
        match claims::try_acquire(conn, &signature, &alert.alert_id, now, self.lease_ttl)? {
            LeaseOutcome::Held { holder, since } => {
                debug!(signature = %signature, holder = %holder, "Signature lease held elsewhere");
                return Ok(Admission::Busy { holder, since });
            }
            LeaseOutcome::TakenOver { previous_holder } => {
                warn!(
                    signature = %signature,
                    previous_holder = %previous_holder,
                    "Took over stale ticket lease"
                );
            }
            LeaseOutcome::Acquired => {}
        }

        alerts::insert(conn, &alert)?;
        history::append(
            conn,
            &alert.alert_id,
            HistoryAction::Created,
            None,
            &json!({"signature": signature, "severity": alert.severity}),
            now,
        )?;
        info!(signature = %signature, alert_id = %alert.alert_id, "New incident");
        Ok(Admission::NewIncident { alert })
    }

    /// Persist `raw` without a ticket after giving up on another ingestion's lease.
    pub fn defer(
        &self,
        conn: &Connection,
        raw: &RawAlert,
        payload: &serde_json::Value,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        let signature = signature(raw.name().unwrap_or_default(), raw.instance());
        let alert = new_alert(conn, raw, payload, &signature, now)?;
        alerts::insert(conn, &alert)?;
        history::append(
            conn,
            &alert.alert_id,
            HistoryAction::TicketDeferred,
            None,
            &json!({"signature": signature, "lease_holder": holder}),
            now,
        )?;
        warn!(signature = %signature, alert_id = %alert.alert_id, holder = %holder, "Ticket deferred");
        Ok(alert)
    }
}

/// `{name}_{instance}_{epoch_millis}`, moved forward a millisecond at a time
/// until it is unused.
pub fn next_alert_id(
    conn: &Connection,
    name: &str,
    instance: &str,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let mut millis = now.timestamp_millis();
    loop {
        let candidate = format!("{name}_{instance}_{millis}");
        if !alerts::exists(conn, &candidate)? {
            return Ok(candidate);
        }
        millis += 1;
    }
}

fn new_alert(
    conn: &Connection,
    raw: &RawAlert,
    payload: &serde_json::Value,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<Alert, StoreError> {
    let name = raw.name().unwrap_or_default().to_string();
    let instance = raw.instance().to_string();
    // Stored precision, so the returned row equals what a reload yields.
    let now = from_millis(now.timestamp_millis());
    Ok(Alert {
        alert_id: next_alert_id(conn, &name, &instance, now)?,
        signature: signature.to_string(),
        severity: raw.severity(),
        status: AlertStatus::Firing,
        labels: raw.labels.clone(),
        annotations: raw.annotations.clone(),
        raw_payload: payload.clone(),
        starts_at: raw.starts_at.clone(),
        ticket: None,
        notification: None,
        assignment: None,
        created_at: now,
        updated_at: now,
        name,
        instance,
    })
}

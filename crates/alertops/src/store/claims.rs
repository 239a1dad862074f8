//! Per-signature ticket lease.
//!
//! The ingestion that decides "new incident" for a signature inserts a lease
//! row in the same transaction as its alert row and holds it until its ticket
//! call has been recorded. Other ingestions of that signature wait for the
//! lease instead of calling the tracker themselves.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{from_millis, to_millis};
use crate::error::StoreError;

/// Result of [`try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired,
    /// A stale lease was replaced
    TakenOver { previous_holder: String },
    /// Another ingestion holds a live lease
    Held {
        holder: String,
        since: DateTime<Utc>,
    },
}

impl LeaseOutcome {
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired | Self::TakenOver { .. })
    }
}

/// Current holder of the lease on `signature`.
pub fn holder(
    conn: &Connection,
    signature: &str,
) -> Result<Option<(String, DateTime<Utc>)>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT alert_id, claimed_at FROM ticket_claims WHERE signature = ?1",
            [signature],
            |row| Ok((row.get::<_, String>(0)?, from_millis(row.get(1)?))),
        )
        .optional()?)
}

/// Take the lease on `signature` for `alert_id` unless a live one exists.
pub fn try_acquire(
    conn: &Connection,
    signature: &str,
    alert_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<LeaseOutcome, StoreError> {
    let outcome = match holder(conn, signature)? {
        None => LeaseOutcome::Acquired,
        Some((holder, since)) if now - since < ttl => {
            return Ok(LeaseOutcome::Held { holder, since });
        }
        Some((previous_holder, _)) => LeaseOutcome::TakenOver { previous_holder },
    };

    conn.execute(
        "INSERT INTO ticket_claims (signature, alert_id, claimed_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (signature) DO UPDATE SET alert_id = excluded.alert_id,
             claimed_at = excluded.claimed_at",
        params![signature, alert_id, to_millis(now)],
    )?;
    Ok(outcome)
}

/// Drop the lease if `alert_id` still holds it. A lease that was taken over is left alone.
pub fn release(conn: &Connection, signature: &str, alert_id: &str) -> Result<bool, StoreError> {
    let removed = conn.execute(
        "DELETE FROM ticket_claims WHERE signature = ?1 AND alert_id = ?2",
        params![signature, alert_id],
    )?;
    Ok(removed == 1)
}

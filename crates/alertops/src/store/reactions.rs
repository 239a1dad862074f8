//! Qualifying claim reactions per alert, used to decide whether removing a
//! reaction should release an assignment.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::to_millis;
use crate::error::StoreError;

/// Record a claim reaction. Returns `false` if it was already recorded.
pub fn add(
    conn: &Connection,
    alert_id: &str,
    user_id: &str,
    emoji: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO claim_reactions (alert_id, user_id, emoji, reacted_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![alert_id, user_id, emoji, to_millis(now)],
    )?;
    Ok(inserted == 1)
}

/// Forget a claim reaction. Returns `false` if none was recorded.
pub fn remove(
    conn: &Connection,
    alert_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<bool, StoreError> {
    let removed = conn.execute(
        "DELETE FROM claim_reactions WHERE alert_id = ?1 AND user_id = ?2 AND emoji = ?3",
        params![alert_id, user_id, emoji],
    )?;
    Ok(removed == 1)
}

/// Number of claim reactions still on the alert's message.
pub fn remaining(conn: &Connection, alert_id: &str) -> Result<u64, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM claim_reactions WHERE alert_id = ?1",
        [alert_id],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

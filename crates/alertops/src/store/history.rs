//! Append-only alert history.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{corrupt, from_millis, json_column, to_millis};
use crate::error::StoreError;
use crate::model::{HistoryAction, HistoryEntry};

fn read_entry(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let action: String = row.get(3)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        action: HistoryAction::parse(&action)
            .ok_or_else(|| corrupt(3, format!("unknown history action '{action}'")))?,
        actor: row.get(4)?,
        data: json_column(row, 5)?,
    })
}

/// Append one history row and return its id.
pub fn append(
    conn: &Connection,
    alert_id: &str,
    action: HistoryAction,
    actor: Option<&str>,
    data: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO alert_history (alert_id, timestamp, action, actor, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            alert_id,
            to_millis(now),
            action.as_str(),
            actor,
            serde_json::to_string(data)?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// History of one alert, newest first.
pub fn for_alert(conn: &Connection, alert_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, alert_id, timestamp, action, actor, data FROM alert_history
         WHERE alert_id = ?1
         ORDER BY id DESC",
    )?;
    let rows = stmt.query_map([alert_id], read_entry)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Number of rows per action recorded at or after `since`, restricted to `actions`.
pub fn count_since(
    conn: &Connection,
    actions: &[HistoryAction],
    since: DateTime<Utc>,
) -> Result<Vec<(HistoryAction, u64)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM alert_history WHERE action = ?1 AND timestamp >= ?2",
    )?;
    let mut counts = Vec::with_capacity(actions.len());
    for action in actions {
        let n: i64 = stmt.query_row(params![action.as_str(), to_millis(since)], |row| row.get(0))?;
        counts.push((*action, n.max(0) as u64));
    }
    Ok(counts)
}

//! Metric snapshots for the dashboard. Independent of the alert lifecycle.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{from_millis, json_column, to_millis};
use crate::error::StoreError;
use crate::model::MetricSnapshot;

fn read_snapshot(row: &Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    Ok(MetricSnapshot {
        id: Some(row.get(0)?),
        hostname: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        metrics: json_column(row, 3)?,
        metric_type: row.get(4)?,
    })
}

pub fn insert(conn: &Connection, snapshot: &MetricSnapshot) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO metric_snapshots (hostname, timestamp, metrics, metric_type)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            snapshot.hostname,
            to_millis(snapshot.timestamp),
            serde_json::to_string(&snapshot.metrics)?,
            snapshot.metric_type
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Snapshots taken at or after `since`, newest first.
pub fn list(
    conn: &Connection,
    since: DateTime<Utc>,
    hostname: Option<&str>,
    limit: usize,
) -> Result<Vec<MetricSnapshot>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, hostname, timestamp, metrics, metric_type FROM metric_snapshots
         WHERE timestamp >= ?1 AND (?2 IS NULL OR hostname = ?2)
         ORDER BY timestamp DESC, id DESC
         LIMIT ?3",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![to_millis(since), hostname, limit], read_snapshot)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

//! Alert rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{corrupt, from_millis, json_column, to_millis};
use crate::error::StoreError;
use crate::model::{
    Alert, AlertStatus, Assignment, AssignmentMethod, NotificationRef, Severity, TicketRef,
};

const COLUMNS: &str = "alert_id, signature, name, instance, severity, status, labels, \
    annotations, raw_payload, starts_at, ticket_key, ticket_url, notification_channel, \
    notification_message_id, assignee_id, assignee_name, assigned_at, assignment_method, \
    assignment_emoji, created_at, updated_at";

/// Default page size for alert listings.
pub const DEFAULT_LIMIT: usize = 50;

/// Filter for [`list`].
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// `None` means [`DEFAULT_LIMIT`]
    pub limit: Option<usize>,
}

/// Aggregate counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub total_alerts: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub recent_24h: u64,
    pub tickets: u64,
    pub open_tickets: u64,
}

fn read_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let severity: String = row.get(4)?;
    let status: String = row.get(5)?;
    let status = status.parse::<AlertStatus>().map_err(|e| corrupt(5, e))?;

    let ticket = match (row.get::<_, Option<String>>(10)?, row.get::<_, Option<String>>(11)?) {
        (Some(key), url) => Some(TicketRef {
            key,
            url: url.unwrap_or_default(),
        }),
        (None, _) => None,
    };

    let notification = match (row.get::<_, Option<String>>(12)?, row.get::<_, Option<String>>(13)?) {
        (channel, Some(message_id)) => Some(NotificationRef {
            channel: channel.unwrap_or_default(),
            message_id,
        }),
        (_, None) => None,
    };

    let assignment = match row.get::<_, Option<String>>(14)? {
        Some(assignee_id) => {
            let method: Option<String> = row.get(17)?;
            let method = method
                .as_deref()
                .and_then(AssignmentMethod::parse)
                .ok_or_else(|| corrupt(17, format!("bad assignment method {method:?}")))?;
            Some(Assignment {
                assignee_name: row
                    .get::<_, Option<String>>(15)?
                    .unwrap_or_else(|| assignee_id.clone()),
                assignee_id,
                assigned_at: from_millis(row.get::<_, Option<i64>>(16)?.unwrap_or_default()),
                method,
                emoji: row.get(18)?,
            })
        }
        None => None,
    };

    Ok(Alert {
        alert_id: row.get(0)?,
        signature: row.get(1)?,
        name: row.get(2)?,
        instance: row.get(3)?,
        severity: Severity::from_label(&severity),
        status,
        labels: json_column(row, 6)?,
        annotations: json_column(row, 7)?,
        raw_payload: json_column(row, 8)?,
        starts_at: row.get(9)?,
        ticket,
        notification,
        assignment,
        created_at: from_millis(row.get(19)?),
        updated_at: from_millis(row.get(20)?),
    })
}

pub fn insert(conn: &Connection, alert: &Alert) -> Result<(), StoreError> {
    let assignment = alert.assignment.as_ref();
    conn.execute(
        &format!(
            "INSERT INTO alerts ({COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21
            )"
        ),
        params![
            alert.alert_id,
            alert.signature,
            alert.name,
            alert.instance,
            alert.severity.as_str(),
            alert.status.as_str(),
            serde_json::to_string(&alert.labels)?,
            serde_json::to_string(&alert.annotations)?,
            serde_json::to_string(&alert.raw_payload)?,
            alert.starts_at,
            alert.ticket.as_ref().map(|t| &t.key),
            alert.ticket.as_ref().map(|t| &t.url),
            alert.notification.as_ref().map(|n| &n.channel),
            alert.notification.as_ref().map(|n| &n.message_id),
            assignment.map(|a| &a.assignee_id),
            assignment.map(|a| &a.assignee_name),
            assignment.map(|a| to_millis(a.assigned_at)),
            assignment.map(|a| a.method.as_str()),
            assignment.and_then(|a| a.emoji.as_ref()),
            to_millis(alert.created_at),
            to_millis(alert.updated_at),
        ],
    )?;
    Ok(())
}

pub fn exists(conn: &Connection, alert_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM alerts WHERE alert_id = ?1",
            [alert_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn get(conn: &Connection, alert_id: &str) -> Result<Option<Alert>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM alerts WHERE alert_id = ?1"),
            [alert_id],
            read_alert,
        )
        .optional()?)
}

/// Most recent ticketed alert for `signature` that still counts as open.
///
/// With `resolved_since`, a resolved alert updated at or after that instant
/// counts as open too.
pub fn find_open_ticketed(
    conn: &Connection,
    signature: &str,
    resolved_since: Option<DateTime<Utc>>,
) -> Result<Option<Alert>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM alerts
                 WHERE signature = ?1
                   AND ticket_key IS NOT NULL
                   AND (status != 'resolved' OR (?2 IS NOT NULL AND updated_at >= ?2))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            ),
            params![signature, resolved_since.map(to_millis)],
            read_alert,
        )
        .optional()?)
}

/// Non-resolved alerts for `signature`, newest first.
pub fn open_for_signature(conn: &Connection, signature: &str) -> Result<Vec<Alert>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM alerts
         WHERE signature = ?1 AND status != 'resolved'
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map([signature], read_alert)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Alert whose notification carries `message_id`.
pub fn find_by_message(conn: &Connection, message_id: &str) -> Result<Option<Alert>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM alerts
                 WHERE notification_message_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            ),
            [message_id],
            read_alert,
        )
        .optional()?)
}

/// Attach a ticket. Returns `false` when the alert already has one.
pub fn set_ticket(
    conn: &Connection,
    alert_id: &str,
    ticket: &TicketRef,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE alerts SET ticket_key = ?2, ticket_url = ?3, updated_at = ?4
         WHERE alert_id = ?1 AND ticket_key IS NULL",
        params![alert_id, ticket.key, ticket.url, to_millis(now)],
    )?;
    Ok(changed == 1)
}

pub fn set_notification(
    conn: &Connection,
    alert_id: &str,
    notification: &NotificationRef,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE alerts SET notification_channel = ?2, notification_message_id = ?3, updated_at = ?4
         WHERE alert_id = ?1",
        params![
            alert_id,
            notification.channel,
            notification.message_id,
            to_millis(now)
        ],
    )?;
    Ok(())
}

/// Replace the assignment (or clear it with `None`) and set the status.
pub fn set_assignment(
    conn: &Connection,
    alert_id: &str,
    assignment: Option<&Assignment>,
    status: AlertStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE alerts SET assignee_id = ?2, assignee_name = ?3, assigned_at = ?4,
             assignment_method = ?5, assignment_emoji = ?6, status = ?7, updated_at = ?8
         WHERE alert_id = ?1",
        params![
            alert_id,
            assignment.map(|a| &a.assignee_id),
            assignment.map(|a| &a.assignee_name),
            assignment.map(|a| to_millis(a.assigned_at)),
            assignment.map(|a| a.method.as_str()),
            assignment.and_then(|a| a.emoji.as_ref()),
            status.as_str(),
            to_millis(now),
        ],
    )?;
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    alert_id: &str,
    status: AlertStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE alerts SET status = ?2, updated_at = ?3 WHERE alert_id = ?1",
        params![alert_id, status.as_str(), to_millis(now)],
    )?;
    Ok(())
}

/// Alerts matching `filter`, newest first.
pub fn list(conn: &Connection, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(severity) = filter.severity {
        values.push(Value::Text(severity.as_str().to_string()));
        clauses.push(format!("severity = ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(since) = filter.since {
        values.push(Value::Integer(to_millis(since)));
        clauses.push(format!("created_at >= ?{}", values.len()));
    }
    if let Some(until) = filter.until {
        values.push(Value::Integer(to_millis(until)));
        clauses.push(format!("created_at <= ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    values.push(Value::Integer(
        filter.limit.unwrap_or(DEFAULT_LIMIT).try_into().unwrap_or(i64::MAX),
    ));
    let sql = format!(
        "SELECT {COLUMNS} FROM alerts {where_clause}
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?{}",
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), read_alert)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn grouped_counts(conn: &Connection, column: &str) -> Result<BTreeMap<String, u64>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM alerts GROUP BY {column}"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count.max(0) as u64);
    }
    Ok(counts)
}

fn count(conn: &Connection, sql: &str, param: Option<i64>) -> Result<u64, StoreError> {
    let n: i64 = match param {
        Some(p) => conn.query_row(sql, [p], |row| row.get(0))?,
        None => conn.query_row(sql, [], |row| row.get(0))?,
    };
    Ok(n.max(0) as u64)
}

pub fn stats(conn: &Connection, now: DateTime<Utc>) -> Result<AlertStats, StoreError> {
    let day_ago = to_millis(now - chrono::Duration::hours(24));
    Ok(AlertStats {
        total_alerts: count(conn, "SELECT COUNT(*) FROM alerts", None)?,
        by_severity: grouped_counts(conn, "severity")?,
        by_status: grouped_counts(conn, "status")?,
        recent_24h: count(
            conn,
            "SELECT COUNT(*) FROM alerts WHERE created_at >= ?1",
            Some(day_ago),
        )?,
        tickets: count(conn, "SELECT COUNT(*) FROM ticket_records", None)?,
        open_tickets: count(
            conn,
            "SELECT COUNT(*) FROM ticket_records WHERE status = 'open'",
            None,
        )?,
    })
}

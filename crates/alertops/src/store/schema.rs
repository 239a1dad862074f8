//! Table definitions.

use rusqlite::Connection;

use crate::error::StoreError;

/// Bumped whenever `SCHEMA` changes shape.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    alert_id                TEXT PRIMARY KEY,
    signature               TEXT NOT NULL,
    name                    TEXT NOT NULL,
    instance                TEXT NOT NULL,
    severity                TEXT NOT NULL,
    status                  TEXT NOT NULL,
    labels                  TEXT NOT NULL,
    annotations             TEXT NOT NULL,
    raw_payload             TEXT NOT NULL,
    starts_at               TEXT,
    ticket_key              TEXT,
    ticket_url              TEXT,
    notification_channel    TEXT,
    notification_message_id TEXT,
    assignee_id             TEXT,
    assignee_name           TEXT,
    assigned_at             INTEGER,
    assignment_method       TEXT,
    assignment_emoji        TEXT,
    created_at              INTEGER NOT NULL,
    updated_at              INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_signature ON alerts (signature);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts (severity);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts (status);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts (created_at);
CREATE INDEX IF NOT EXISTS idx_alerts_message ON alerts (notification_message_id);

CREATE TABLE IF NOT EXISTS alert_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id  TEXT NOT NULL REFERENCES alerts (alert_id),
    timestamp INTEGER NOT NULL,
    action    TEXT NOT NULL,
    actor     TEXT,
    data      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_alert_id ON alert_history (alert_id);
CREATE INDEX IF NOT EXISTS idx_history_timestamp ON alert_history (timestamp);

CREATE TRIGGER IF NOT EXISTS alert_history_no_update
BEFORE UPDATE ON alert_history
BEGIN
    SELECT RAISE(ABORT, 'alert_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS alert_history_no_delete
BEFORE DELETE ON alert_history
BEGIN
    SELECT RAISE(ABORT, 'alert_history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS alerts_ticket_write_once
BEFORE UPDATE OF ticket_key ON alerts
WHEN OLD.ticket_key IS NOT NULL AND NEW.ticket_key IS NOT OLD.ticket_key
BEGIN
    SELECT RAISE(ABORT, 'ticket_key is write-once');
END;

CREATE TABLE IF NOT EXISTS ticket_records (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id   TEXT NOT NULL REFERENCES alerts (alert_id),
    ticket_key TEXT NOT NULL UNIQUE,
    ticket_url TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'open',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_alert_id ON ticket_records (alert_id);

CREATE TABLE IF NOT EXISTS ticket_claims (
    signature  TEXT PRIMARY KEY,
    alert_id   TEXT NOT NULL,
    claimed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS claim_reactions (
    alert_id   TEXT NOT NULL REFERENCES alerts (alert_id),
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    reacted_at INTEGER NOT NULL,
    PRIMARY KEY (alert_id, user_id, emoji)
);

CREATE TABLE IF NOT EXISTS metric_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname    TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    metrics     TEXT NOT NULL,
    metric_type TEXT NOT NULL DEFAULT 'system'
);

CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON metric_snapshots (timestamp);
";

/// Create missing tables and stamp the schema version.
pub fn apply(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Performance and safety pragmas applied to every connection.
pub fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

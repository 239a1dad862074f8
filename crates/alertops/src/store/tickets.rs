//! Ticket records. `ticket_key` is unique across the table.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{corrupt, from_millis, to_millis};
use crate::error::StoreError;
use crate::model::{TicketRecord, TicketStatus};

fn read_record(row: &Row<'_>) -> rusqlite::Result<TicketRecord> {
    let status: String = row.get(3)?;
    Ok(TicketRecord {
        alert_id: row.get(0)?,
        ticket_key: row.get(1)?,
        ticket_url: row.get(2)?,
        status: TicketStatus::parse(&status)
            .ok_or_else(|| corrupt(3, format!("unknown ticket status '{status}'")))?,
        created_at: from_millis(row.get(4)?),
    })
}

/// Record a created ticket. A key that is already recorded yields
/// [`StoreError::DuplicateTicket`].
pub fn insert(conn: &Connection, record: &TicketRecord) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO ticket_records (alert_id, ticket_key, ticket_url, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.alert_id,
            record.ticket_key,
            record.ticket_url,
            record.status.as_str(),
            to_millis(record.created_at)
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(StoreError::DuplicateTicket(record.ticket_key.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_key(conn: &Connection, ticket_key: &str) -> Result<Option<TicketRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT alert_id, ticket_key, ticket_url, status, created_at
             FROM ticket_records WHERE ticket_key = ?1",
            [ticket_key],
            read_record,
        )
        .optional()?)
}

/// Every record, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<TicketRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT alert_id, ticket_key, ticket_url, status, created_at
         FROM ticket_records ORDER BY id",
    )?;
    let rows = stmt.query_map([], read_record)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn set_status(
    conn: &Connection,
    ticket_key: &str,
    status: TicketStatus,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE ticket_records SET status = ?2 WHERE ticket_key = ?1",
        params![ticket_key, status.as_str()],
    )?;
    Ok(changed == 1)
}

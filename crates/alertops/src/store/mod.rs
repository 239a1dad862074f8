//! SQLite-backed alert record store.
//!
//! One connection behind a mutex is the single writer. Every multi-row change
//! goes through [`AlertStore::write`], which runs the closure inside a
//! `BEGIN IMMEDIATE` transaction, so an alert row and its history row become
//! visible together or not at all. The query modules are plain functions over
//! `&Connection` so they compose inside one transaction.

pub mod alerts;
pub mod claims;
pub mod history;
pub mod metrics;
pub mod reactions;
pub mod schema;
pub mod tickets;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::StoreError;

pub use alerts::{AlertFilter, AlertStats};
pub use claims::LeaseOutcome;

/// Handle to the alert database.
pub struct AlertStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl AlertStore {
    /// Open (and create if needed) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened alert store");
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        schema::apply_pragmas(&conn)?;
        schema::apply(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run read-only queries.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Cheap reachability check used by the health endpoint.
    pub fn ping(&self) -> bool {
        self.read(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .is_ok()
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Wrap a decode failure for column `idx` so it surfaces as a rusqlite error.
pub(crate) fn corrupt(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StoreError::Corrupt(message.into())),
    )
}

/// Decode a JSON text column.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

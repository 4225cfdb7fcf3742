//! SQLite-backed request store.
//!
//! One connection behind a mutex; every method takes the lock for the
//! duration of a single statement or transaction and never across an await.

mod outbox;
mod replies;
mod requests;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::RequestStatus;

pub use schema::SCHEMA;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("a reply to request {0} is already in flight")]
    ReplyInFlight(Uuid),
    #[error("reply attempt {0} is not awaiting record")]
    AttemptNotSent(Uuid),
    #[error("prayer request {id} is {status} and cannot be replied to")]
    NotReplyable { id: Uuid, status: RequestStatus },
    #[error("prayer request {0} not found")]
    NotFound(Uuid),
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!("Opening database at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

/// A timestamp strictly later than `prev`, normally just "now".
pub fn tick_after(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}

fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {raw:?}").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_after_is_strictly_later() {
        let future = Utc::now() + Duration::seconds(30);
        let next = tick_after(future);
        assert!(next > future);
        let past = Utc::now() - Duration::seconds(30);
        assert!(tick_after(past) > past);
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
    }
}

//! Durable SQLite store shared by the failure ledger and transfer reports.
//!
//! Several processes may open the same database file; every read-modify-write
//! runs inside an IMMEDIATE transaction and waits on the busy timeout.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub mod error;
pub mod ledger;
pub mod reports;
pub(crate) mod schema;

use error::StoreError;

/// How long a writer waits for another process's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of "now" for backoff windows and report timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Handle to one SQLite connection. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    clock: Clock,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: system_clock(),
        })
    }

    /// Replace the clock, e.g. to evaluate backoff windows at a fixed time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// converts a UTC datetime to seconds since unix epoch
pub(crate) fn to_unix(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// converts seconds since unix epoch back to a UTC datetime
pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0).ok_or(StoreError::InvalidTimestamp(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_db_initializes_schema() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        for table in schema::tables::ALL_TABLES {
            assert!(tables.contains(&table.to_string()));
        }
    }

    #[test]
    fn unix_round_trip_keeps_seconds() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(from_unix(to_unix(now)).unwrap(), now);
    }
}

//! adsum-store — SQLite persistence for the attendance kiosk.
//!
//! One connection behind a mutex; the unique `(employee, date)` index on
//! attendance rows is the final arbiter against concurrent double
//! check-ins from other processes sharing the database file.

pub mod attendance;
pub mod audit;
pub mod employees;
pub mod faces;
pub mod schedule;
mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub use attendance::CheckInApplied;
pub use faces::FaceRow;
pub use schedule::HolidayImportStats;

pub(crate) const DATE_FMT: &str = "%Y-%m-%d";
pub(crate) const TIME_FMT: &str = "%H:%M:%S";
pub(crate) const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("employee {0} not found")]
    EmployeeNotFound(i64),
    #[error("face {0} not found")]
    FaceNotFound(i64),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the kiosk database. Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`, apply the schema and seed
    /// defaults idempotently.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StoreError::Corrupt(format!("create {}: {e}", dir.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "database opened");
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::create_all(&conn)?;
        schema::seed_defaults(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! SQLite database for the authoritative store
//!
//! ## Tables
//!
//! - `habit_completions` - upsert by (identity, habit, date)
//! - `journal_entries` - upsert by (identity, date)
//! - `focus_sessions` - append-only, unique on (identity, date, minutes, task)
//! - `trades` - append-only, unique on (identity, natural key)
//! - `xp_totals` - one monotonic counter per identity

pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::ServerError;

pub struct RemoteDb {
    conn: Mutex<Connection>,
}

impl RemoteDb {
    /// Open or create `ascend.db` under `storage_dir`
    pub fn open(storage_dir: &Path) -> Result<Self, ServerError> {
        std::fs::create_dir_all(storage_dir).map_err(|e| {
            ServerError::Config(format!("Failed to create {}: {}", storage_dir.display(), e))
        })?;
        let db_path = storage_dir.join("ascend.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| ServerError::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ServerError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ServerError> {
        debug!("Opening in-memory SQLite database");
        let conn = Connection::open_in_memory().map_err(|e| {
            ServerError::Database(format!("Failed to open in-memory SQLite: {}", e))
        })?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self, ServerError> {
        schema::init_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, ServerError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ServerError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    pub fn stats(&self) -> Result<DbStats, ServerError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, ServerError> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
                Ok(n as u64)
            };
            Ok(DbStats {
                identities: count("xp_totals")?,
                habit_completions: count("habit_completions")?,
                journal_entries: count("journal_entries")?,
                focus_sessions: count("focus_sessions")?,
                trades: count("trades")?,
            })
        })
    }
}

/// Row counts across all identities
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub identities: u64,
    pub habit_completions: u64,
    pub journal_entries: u64,
    pub focus_sessions: u64,
    pub trades: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_on_disk_creates_dir() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join("data");
        let db = RemoteDb::open(&storage).unwrap();
        assert!(storage.join("ascend.db").exists());
        assert_eq!(db.stats().unwrap().trades, 0);
    }
}

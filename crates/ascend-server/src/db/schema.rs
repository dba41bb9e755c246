//! Remote store tables
//!
//! A fresh database gets every table and its version row in one transaction.
//! A database stamped with any other version is refused rather than guessed
//! at.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::ServerError;

pub const SCHEMA_VERSION: i32 = 1;

/// Create the tables on a fresh database, or confirm an existing one matches.
pub fn init_schema(conn: &mut Connection) -> Result<(), ServerError> {
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
    let stamped: Option<i32> = tx
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    match stamped {
        None => {
            tx.execute_batch(TABLES_SCHEMA)?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
            tx.commit()?;
            info!(version = SCHEMA_VERSION, "Created remote store schema");
            Ok(())
        }
        Some(version) if version == SCHEMA_VERSION => {
            info!(version, "Remote store schema up to date");
            Ok(())
        }
        Some(version) => Err(ServerError::Database(format!(
            "Unsupported schema version {} (this build expects {})",
            version, SCHEMA_VERSION
        ))),
    }
}

/// Every table is scoped by identity. Natural keys are unique so a stale
/// existence check can never produce a duplicate row.
const TABLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS habit_completions (
    identity_id TEXT NOT NULL,
    habit_id TEXT NOT NULL,
    date TEXT NOT NULL,
    completed INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (identity_id, habit_id, date)
);

CREATE TABLE IF NOT EXISTS journal_entries (
    identity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    wins TEXT NOT NULL,
    gaps TEXT NOT NULL,
    fix TEXT NOT NULL,
    rating INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (identity_id, date)
);

CREATE TABLE IF NOT EXISTS focus_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    task TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (identity_id, date, duration_minutes, task)
);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    pair TEXT NOT NULL,
    direction TEXT NOT NULL,
    entry_price REAL NOT NULL,
    stop_loss REAL NOT NULL,
    take_profit REAL NOT NULL,
    outcome TEXT NOT NULL,
    risk_reward_ratio REAL NOT NULL,
    emotion TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (identity_id, natural_key)
);

CREATE TABLE IF NOT EXISTS xp_totals (
    identity_id TEXT PRIMARY KEY,
    xp_total INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_focus_identity ON focus_sessions(identity_id);
CREATE INDEX IF NOT EXISTS idx_trades_identity ON trades(identity_id);
"#;

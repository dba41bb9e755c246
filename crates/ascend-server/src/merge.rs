//! Merge handlers for one exchange
//!
//! - Focus sessions and trades are append-only: an existing natural key is
//!   skipped, never updated, so resubmitting after a lost response is safe.
//! - Habit completions and journal entries are upserted by key.
//! - The XP total only moves up: it becomes the max of the stored and the
//!   submitted value.
//!
//! Everything runs in one transaction; the response is read back inside it.

use std::collections::BTreeMap;

use ascend_types::{
    resolve, FocusSession, HabitCompletion, JournalEntry, SyncRequest, SyncResponse, Trade,
    TradeDirection,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::debug;

use crate::error::ServerError;

/// Counts of what one exchange changed, for logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub habits_upserted: usize,
    pub journal_upserted: usize,
    pub focus_inserted: usize,
    pub focus_skipped: usize,
    pub trades_inserted: usize,
    pub trades_skipped: usize,
    pub xp_before: u64,
    pub xp_total: u64,
}

/// Apply `request` for its identity and return the resolved state.
pub fn merge_exchange(
    conn: &mut Connection,
    request: &SyncRequest,
) -> Result<(SyncResponse, MergeReport), ServerError> {
    request
        .validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let identity = request.identity_id.as_str();
    let now = Utc::now().to_rfc3339();
    let mut report = MergeReport::default();

    let tx = conn.transaction()?;

    report.habits_upserted = upsert_habits(&tx, identity, &request.habit_completions, &now)?;
    report.journal_upserted = upsert_journal(&tx, identity, &request.journal_entries, &now)?;

    for session in &request.focus_sessions {
        if insert_focus(&tx, identity, session, &now)? {
            report.focus_inserted += 1;
        } else {
            report.focus_skipped += 1;
        }
    }
    for trade in &request.trades {
        if insert_trade(&tx, identity, trade, &now)? {
            report.trades_inserted += 1;
        } else {
            report.trades_skipped += 1;
        }
    }

    report.xp_before = load_xp(&tx, identity)?;
    report.xp_total = merge_xp(&tx, identity, request.xp_total, &now)?;

    let response = load_state(&tx, identity, report.xp_total)?;
    tx.commit()?;

    debug!(identity, report = ?report, "Merge committed");
    Ok((response, report))
}

/// Duplicate keys within one request resolve "completed wins".
fn upsert_habits(
    tx: &Transaction<'_>,
    identity: &str,
    habits: &[HabitCompletion],
    now: &str,
) -> Result<usize, ServerError> {
    let mut by_key: BTreeMap<(&str, &str), bool> = BTreeMap::new();
    for habit in habits {
        *by_key
            .entry((habit.habit_id.as_str(), habit.date.as_str()))
            .or_insert(false) |= habit.completed;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO habit_completions (identity_id, habit_id, date, completed, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (identity_id, habit_id, date)
         DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at",
    )?;
    for ((habit_id, date), completed) in &by_key {
        stmt.execute(params![identity, habit_id, date, completed, now])?;
    }
    Ok(by_key.len())
}

/// Duplicate dates within one request resolve "last in the payload wins".
fn upsert_journal(
    tx: &Transaction<'_>,
    identity: &str,
    entries: &[JournalEntry],
    now: &str,
) -> Result<usize, ServerError> {
    let by_date: BTreeMap<&str, &JournalEntry> =
        entries.iter().map(|e| (e.date.as_str(), e)).collect();

    let mut stmt = tx.prepare_cached(
        "INSERT INTO journal_entries (identity_id, date, wins, gaps, fix, rating, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (identity_id, date)
         DO UPDATE SET wins = excluded.wins, gaps = excluded.gaps, fix = excluded.fix,
                       rating = excluded.rating, updated_at = excluded.updated_at",
    )?;
    for (date, entry) in &by_date {
        stmt.execute(params![
            identity,
            date,
            entry.wins,
            entry.gaps,
            entry.fix,
            entry.rating,
            now
        ])?;
    }
    Ok(by_date.len())
}

/// Returns `true` if the session was new.
fn insert_focus(
    tx: &Transaction<'_>,
    identity: &str,
    session: &FocusSession,
    now: &str,
) -> Result<bool, ServerError> {
    let exists = tx
        .prepare_cached(
            "SELECT 1 FROM focus_sessions
             WHERE identity_id = ?1 AND date = ?2 AND duration_minutes = ?3 AND task = ?4",
        )?
        .query_row(
            params![identity, session.date, session.duration_minutes, session.task],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if exists {
        return Ok(false);
    }

    // The unique index backs the check above if another exchange won the race
    let inserted = tx
        .prepare_cached(
            "INSERT OR IGNORE INTO focus_sessions
             (identity_id, date, duration_minutes, task, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?
        .execute(params![
            identity,
            session.date,
            session.duration_minutes,
            session.task,
            session.category,
            now
        ])?;
    Ok(inserted == 1)
}

/// Returns `true` if the trade was new.
fn insert_trade(
    tx: &Transaction<'_>,
    identity: &str,
    trade: &Trade,
    now: &str,
) -> Result<bool, ServerError> {
    let exists = tx
        .prepare_cached("SELECT 1 FROM trades WHERE identity_id = ?1 AND natural_key = ?2")?
        .query_row(params![identity, trade.natural_key], |_| Ok(()))
        .optional()?
        .is_some();
    if exists {
        return Ok(false);
    }

    let inserted = tx
        .prepare_cached(
            "INSERT OR IGNORE INTO trades
             (identity_id, natural_key, pair, direction, entry_price, stop_loss, take_profit,
              outcome, risk_reward_ratio, emotion, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?
        .execute(params![
            identity,
            trade.natural_key,
            trade.pair,
            trade.direction.as_str(),
            trade.entry_price,
            trade.stop_loss,
            trade.take_profit,
            trade.outcome,
            trade.risk_reward_ratio,
            trade.emotion,
            now
        ])?;
    Ok(inserted == 1)
}

fn to_sql_xp(xp: u64) -> Result<i64, ServerError> {
    i64::try_from(xp).map_err(|_| {
        ServerError::BadRequest(format!("xpTotal {} exceeds the maximum of {}", xp, i64::MAX))
    })
}

fn load_xp(conn: &Connection, identity: &str) -> Result<u64, ServerError> {
    let xp: Option<i64> = conn
        .query_row(
            "SELECT xp_total FROM xp_totals WHERE identity_id = ?1",
            [identity],
            |row| row.get(0),
        )
        .optional()?;
    Ok(xp.map_or(0, |v| v.max(0) as u64))
}

/// Monotonic max; commutative under concurrent exchanges.
fn merge_xp(tx: &Transaction<'_>, identity: &str, submitted: u64, now: &str) -> Result<u64, ServerError> {
    tx.execute(
        "INSERT INTO xp_totals (identity_id, xp_total, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (identity_id)
         DO UPDATE SET xp_total = max(xp_total, excluded.xp_total), updated_at = excluded.updated_at",
        params![identity, to_sql_xp(submitted)?, now],
    )?;
    load_xp(tx, identity)
}

/// Full resolved state for one identity.
pub fn load_state(conn: &Connection, identity: &str, xp_total: u64) -> Result<SyncResponse, ServerError> {
    let habit_completions = conn
        .prepare_cached(
            "SELECT habit_id, date, completed FROM habit_completions
             WHERE identity_id = ?1 ORDER BY habit_id, date",
        )?
        .query_map([identity], |row| {
            Ok(HabitCompletion {
                habit_id: row.get(0)?,
                date: row.get(1)?,
                completed: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let journal_entries = conn
        .prepare_cached(
            "SELECT date, wins, gaps, fix, rating FROM journal_entries
             WHERE identity_id = ?1 ORDER BY date",
        )?
        .query_map([identity], |row| {
            Ok(JournalEntry {
                date: row.get(0)?,
                wins: row.get(1)?,
                gaps: row.get(2)?,
                fix: row.get(3)?,
                rating: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let focus_sessions = conn
        .prepare_cached(
            "SELECT date, duration_minutes, task, category FROM focus_sessions
             WHERE identity_id = ?1 ORDER BY id",
        )?
        .query_map([identity], |row| {
            Ok(FocusSession {
                date: row.get(0)?,
                duration_minutes: row.get(1)?,
                task: row.get(2)?,
                category: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let trades = conn
        .prepare_cached(
            "SELECT natural_key, pair, direction, entry_price, stop_loss, take_profit,
                    outcome, risk_reward_ratio, emotion
             FROM trades WHERE identity_id = ?1 ORDER BY id",
        )?
        .query_map([identity], |row| {
            let direction: String = row.get(2)?;
            let direction = direction.parse::<TradeDirection>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?;
            Ok(Trade {
                natural_key: row.get(0)?,
                pair: row.get(1)?,
                direction,
                entry_price: row.get(3)?,
                stop_loss: row.get(4)?,
                take_profit: row.get(5)?,
                outcome: row.get(6)?,
                risk_reward_ratio: row.get(7)?,
                emotion: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SyncResponse {
        xp_total,
        level: resolve(xp_total).level,
        habit_completions,
        journal_entries,
        focus_sessions,
        trades,
    })
}

//! Exchange payloads
//!
//! One request carries the client's full transmittable snapshot plus its XP
//! counter; one response carries the remote store's resolved state for every
//! kind. Field names are camelCase on the wire.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ContractError;
use crate::level::{resolve, MAX_XP_TOTAL};
use crate::model::{is_calendar_date, FocusSession, HabitCompletion, JournalEntry, Record, Trade};

/// Route the remote store serves exchanges on
pub const SYNC_PATH: &str = "/api/v1/sync";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub identity_id: String,
    #[serde(default)]
    pub habit_completions: Vec<HabitCompletion>,
    #[serde(default)]
    pub journal_entries: Vec<JournalEntry>,
    #[serde(default)]
    pub focus_sessions: Vec<FocusSession>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub xp_total: u64,
}

impl SyncRequest {
    /// Reject payloads the remote store cannot key.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.identity_id.trim().is_empty() {
            return Err(ContractError::MissingIdentity);
        }
        check_xp(self.xp_total)?;
        check_records(
            &self.habit_completions,
            &self.journal_entries,
            &self.focus_sessions,
            &self.trades,
        )
    }

    /// Total number of records carried, for logging
    pub fn record_count(&self) -> usize {
        self.habit_completions.len()
            + self.journal_entries.len()
            + self.focus_sessions.len()
            + self.trades.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub xp_total: u64,
    pub level: u32,
    pub habit_completions: Vec<HabitCompletion>,
    pub journal_entries: Vec<JournalEntry>,
    pub focus_sessions: Vec<FocusSession>,
    pub trades: Vec<Trade>,
}

impl SyncResponse {
    /// Basic shape validation applied by the client before any writeback.
    pub fn validate(&self) -> Result<(), ContractError> {
        check_xp(self.xp_total)?;
        let expected = resolve(self.xp_total).level;
        if self.level != expected {
            return Err(ContractError::LevelMismatch {
                xp_total: self.xp_total,
                level: self.level,
                expected,
            });
        }

        check_records(
            &self.habit_completions,
            &self.journal_entries,
            &self.focus_sessions,
            &self.trades,
        )?;
        check_unique("habit", &self.habit_completions)?;
        check_unique("journal", &self.journal_entries)?;
        Ok(())
    }
}

fn check_xp(xp_total: u64) -> Result<(), ContractError> {
    if xp_total > MAX_XP_TOTAL {
        return Err(ContractError::XpOutOfRange {
            xp_total,
            max: MAX_XP_TOTAL,
        });
    }
    Ok(())
}

/// Calendar dates on every date-keyed record, journal ratings in range and
/// finite trade figures
fn check_records(
    habits: &[HabitCompletion],
    journal: &[JournalEntry],
    focus: &[FocusSession],
    trades: &[Trade],
) -> Result<(), ContractError> {
    check_dates("habit", habits.iter().map(|h| h.date.as_str()))?;
    check_dates("journal", journal.iter().map(|j| j.date.as_str()))?;
    check_dates("focus", focus.iter().map(|f| f.date.as_str()))?;
    for entry in journal {
        if !JournalEntry::RATING_RANGE.contains(&entry.rating) {
            return Err(ContractError::RatingOutOfRange {
                date: entry.date.clone(),
                rating: entry.rating,
            });
        }
    }
    trades.iter().try_for_each(|trade| trade.check())
}

fn check_dates<'a>(
    kind: &'static str,
    dates: impl Iterator<Item = &'a str>,
) -> Result<(), ContractError> {
    for date in dates {
        if !is_calendar_date(date) {
            return Err(ContractError::InvalidDate {
                kind,
                date: date.to_string(),
            });
        }
    }
    Ok(())
}

fn check_unique<R: Record>(kind: &'static str, records: &[R]) -> Result<(), ContractError> {
    let mut seen = BTreeSet::new();
    for record in records {
        let key = record.key();
        if !seen.insert(key.clone()) {
            return Err(ContractError::DuplicateKey {
                kind,
                key: format!("{:?}", key),
            });
        }
    }
    Ok(())
}

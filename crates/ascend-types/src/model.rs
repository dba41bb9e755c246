//! Trackable records and their natural keys
//!
//! Every record is authored on the client. Keyed kinds (habit completions,
//! journal entries) are upserted by key; append-only kinds (focus sessions,
//! trades) are inserted once per natural key and never mutated afterwards.

use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ContractError;

/// Date format used by every date-keyed record
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Collections held in the local store and exchanged with the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Habits,
    Journal,
    Focus,
    Trades,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Habits,
        EntityKind::Journal,
        EntityKind::Focus,
        EntityKind::Trades,
    ];

    /// Stable name used in persisted keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Habits => "habits",
            EntityKind::Journal => "journal",
            EntityKind::Focus => "focus",
            EntityKind::Trades => "trades",
        }
    }

    /// Append-only kinds are never updated once the remote store holds them
    pub fn is_append_only(&self) -> bool {
        matches!(self, EntityKind::Focus | EntityKind::Trades)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that lives in one collection and is addressed by a natural key.
pub trait Record: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Natural key, derived from record content
    type Key: Ord + Clone + fmt::Debug + Send + Sync;

    /// Collection this record belongs to
    const KIND: EntityKind;

    fn key(&self) -> Self::Key;

    /// Whether this record may be sent to the remote store.
    ///
    /// Date-keyed records written before calendar dates were used carry a
    /// weekday label instead and cannot be reconciled against a real day.
    fn is_transmittable(&self) -> bool {
        true
    }

    /// Reject field values that cannot be stored or encoded faithfully.
    fn check(&self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Returns true if `s` is a real `YYYY-MM-DD` calendar date.
pub fn is_calendar_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, DATE_FORMAT).is_ok()
}

/// Completion flag for one habit on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCompletion {
    pub habit_id: String,
    pub date: String,
    pub completed: bool,
}

impl Record for HabitCompletion {
    type Key = (String, String);
    const KIND: EntityKind = EntityKind::Habits;

    fn key(&self) -> Self::Key {
        (self.habit_id.clone(), self.date.clone())
    }

    fn is_transmittable(&self) -> bool {
        is_calendar_date(&self.date)
    }
}

/// Daily review, one per calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub date: String,
    pub wins: String,
    pub gaps: String,
    pub fix: String,
    /// Self-assessment, 1 to 5
    pub rating: u8,
}

impl JournalEntry {
    pub const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=5;
}

impl Record for JournalEntry {
    type Key = String;
    const KIND: EntityKind = EntityKind::Journal;

    fn key(&self) -> Self::Key {
        self.date.clone()
    }

    /// Out-of-range ratings would be refused by the remote store.
    fn is_transmittable(&self) -> bool {
        is_calendar_date(&self.date) && Self::RATING_RANGE.contains(&self.rating)
    }
}

/// A completed timed focus block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub date: String,
    pub duration_minutes: u32,
    pub task: String,
    pub category: String,
}

impl Record for FocusSession {
    type Key = (String, u32, String);
    const KIND: EntityKind = EntityKind::Focus;

    fn key(&self) -> Self::Key {
        (self.date.clone(), self.duration_minutes, self.task.clone())
    }

    fn is_transmittable(&self) -> bool {
        is_calendar_date(&self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }
}

impl std::str::FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(TradeDirection::Long),
            "short" | "sell" => Ok(TradeDirection::Short),
            other => Err(format!("unknown trade direction: {}", other)),
        }
    }
}

/// A logged trade.
///
/// `natural_key` is generated on the client from the creation timestamp and is
/// reused by the remote store to reject duplicate submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub natural_key: String,
    pub pair: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub outcome: String,
    pub risk_reward_ratio: f64,
    pub emotion: String,
}

impl Trade {
    /// Reward-to-risk ratio implied by the entry, stop and target levels.
    ///
    /// Returns 0.0 when the stop sits on the entry price.
    pub fn implied_risk_reward(entry_price: f64, stop_loss: f64, take_profit: f64) -> f64 {
        let risk = (entry_price - stop_loss).abs();
        if risk == 0.0 {
            return 0.0;
        }
        let reward = (take_profit - entry_price).abs();
        ((reward / risk) * 100.0).round() / 100.0
    }
}

impl Record for Trade {
    type Key = String;
    const KIND: EntityKind = EntityKind::Trades;

    fn key(&self) -> Self::Key {
        self.natural_key.clone()
    }

    fn is_transmittable(&self) -> bool {
        self.check().is_ok()
    }

    /// JSON has no NaN or infinity; serde_json writes them as `null`.
    fn check(&self) -> Result<(), ContractError> {
        let fields = [
            ("entryPrice", self.entry_price),
            ("stopLoss", self.stop_loss),
            ("takeProfit", self.take_profit),
            ("riskRewardRatio", self.risk_reward_ratio),
        ];
        match fields.iter().find(|(_, value)| !value.is_finite()) {
            Some(&(field, _)) => Err(ContractError::NonFinite {
                field,
                key: self.natural_key.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Natural key for a trade created at `created_at_ms` (Unix millis)
pub fn trade_key(created_at_ms: i64) -> String {
    format!("trade-{}", created_at_ms)
}

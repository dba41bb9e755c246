//! Tracker facade
//!
//! Feature code records mutations through this type. Each mutation lands in
//! the local store first and then raises a `Mutation` trigger, so a slow or
//! offline remote store never blocks a write.

use ascend_types::{
    trade_key, FocusSession, HabitCompletion, JournalEntry, LevelProgress, Record, Trade,
    TradeDirection,
};
use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::scheduler::{SyncScheduler, SyncTrigger};
use crate::store::LocalStore;

/// Fields a user enters for a new trade; the key and ratio are derived.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDraft {
    pub pair: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub outcome: String,
    pub emotion: String,
}

#[derive(Clone)]
pub struct Tracker {
    scheduler: SyncScheduler,
}

impl Tracker {
    pub fn new(scheduler: SyncScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    fn store(&self) -> &LocalStore {
        self.scheduler.store()
    }

    fn record<R: Record>(&self, record: R) -> Result<()> {
        self.store().apply_local_change(record)?;
        self.scheduler.request_sync(SyncTrigger::Mutation);
        Ok(())
    }

    pub fn set_habit(&self, habit_id: &str, date: &str, completed: bool) -> Result<()> {
        self.record(HabitCompletion {
            habit_id: habit_id.to_string(),
            date: date.to_string(),
            completed,
        })
    }

    /// Ratings outside 1..=5 are clamped into range.
    pub fn write_journal(&self, mut entry: JournalEntry) -> Result<()> {
        entry.rating = entry.rating.clamp(
            *JournalEntry::RATING_RANGE.start(),
            *JournalEntry::RATING_RANGE.end(),
        );
        self.record(entry)
    }

    pub fn log_focus_session(&self, session: FocusSession) -> Result<()> {
        self.record(session)
    }

    /// Log a new trade under a fresh `trade-<millis>` key.
    pub fn add_trade(&self, draft: TradeDraft) -> Result<Trade> {
        let existing = self.store().read::<Trade>()?;
        let mut millis = Utc::now().timestamp_millis();
        let mut natural_key = trade_key(millis);
        // Two trades logged within the same millisecond
        while existing.iter().any(|t| t.natural_key == natural_key) {
            millis += 1;
            natural_key = trade_key(millis);
        }

        let trade = Trade {
            natural_key,
            risk_reward_ratio: Trade::implied_risk_reward(
                draft.entry_price,
                draft.stop_loss,
                draft.take_profit,
            ),
            pair: draft.pair,
            direction: draft.direction,
            entry_price: draft.entry_price,
            stop_loss: draft.stop_loss,
            take_profit: draft.take_profit,
            outcome: draft.outcome,
            emotion: draft.emotion,
        };
        self.record(trade.clone())?;
        Ok(trade)
    }

    /// Remove a trade from the local list. The remote copy is kept.
    pub fn delete_trade(&self, natural_key: &str) -> Result<bool> {
        let removed = self.store().remove::<Trade>(&natural_key.to_string())?;
        if removed {
            info!(natural_key, "Trade removed locally");
        }
        Ok(removed)
    }

    /// Propose an XP increase and return the locally resolved level.
    pub fn award_xp(&self, points: u64) -> Result<LevelProgress> {
        let total = self.store().propose_xp(points)?;
        self.scheduler.request_sync(SyncTrigger::Mutation);
        Ok(ascend_types::resolve(total))
    }

    pub fn level(&self) -> Result<LevelProgress> {
        self.store().level()
    }
}

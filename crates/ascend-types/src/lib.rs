//! Ascend shared types
//!
//! The records a client tracks, the single request/response pair exchanged
//! with the remote store, and the level resolver both sides use to turn an XP
//! total into a displayed level.

pub mod error;
pub mod level;
pub mod model;
pub mod wire;

pub use error::ContractError;
pub use level::{resolve, resolve_with_unit, LevelProgress, MAX_XP_TOTAL, XP_UNIT};
pub use model::{
    is_calendar_date, trade_key, EntityKind, FocusSession, HabitCompletion, JournalEntry, Record,
    Trade, TradeDirection, DATE_FORMAT,
};
pub use wire::{SyncRequest, SyncResponse, SYNC_PATH};

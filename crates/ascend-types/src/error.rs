//! Contract violations found while validating exchange payloads

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("{kind} record has a non-calendar date: {date}")]
    InvalidDate { kind: &'static str, date: String },

    #[error("Level {level} does not match xpTotal {xp_total} (expected {expected})")]
    LevelMismatch { xp_total: u64, level: u32, expected: u32 },

    #[error("Journal rating {rating} for {date} is outside 1..=5")]
    RatingOutOfRange { date: String, rating: u8 },

    #[error("Duplicate {kind} key: {key}")]
    DuplicateKey { kind: &'static str, key: String },

    #[error("Trade {key} has a non-finite {field}")]
    NonFinite { field: &'static str, key: String },

    #[error("xpTotal {xp_total} exceeds the maximum of {max}")]
    XpOutOfRange { xp_total: u64, max: u64 },

    #[error("Missing identity id")]
    MissingIdentity,
}

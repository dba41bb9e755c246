//! Error types for the Ascend client

use ascend_types::ContractError;
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Client error types
///
/// The first four variants are the exchange failures the scheduler recovers
/// from; none of them touch the local store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No response received (network down, timeout)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Identity token missing or rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Remote store faulted while merging
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Response failed shape validation
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A local mutation carried values that cannot be stored
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Local persistence failed
    #[error("Local store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Short label for status display and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "transport",
            SyncError::Auth(_) => "auth",
            SyncError::Server { .. } => "server",
            SyncError::MalformedResponse(_) => "malformed_response",
            SyncError::InvalidRecord(_) => "invalid_record",
            SyncError::Store(_) => "store",
            SyncError::Config(_) => "config",
        }
    }
}

impl From<sled::Error> for SyncError {
    fn from(err: sled::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<ContractError> for SyncError {
    fn from(err: ContractError) -> Self {
        SyncError::MalformedResponse(err.to_string())
    }
}

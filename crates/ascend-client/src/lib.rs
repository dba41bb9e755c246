//! Ascend client
//!
//! Offline-first side of the tracker: a namespaced local store that accepts
//! writes at any time, and a scheduler that periodically exchanges the full
//! local snapshot with the remote store and reconciles the answer.
//!
//! ## Architecture
//!
//! ```text
//! Tracker ──► LocalStore ◄── reconcile ──┐
//!    │                                   │
//!    └─ Mutation ─► SyncScheduler ─► run_exchange ─► SyncTransport ─► remote
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Result, SyncError};
pub use identity::{CachedIdentity, IdentityProvider};
pub use protocol::{collect, run_exchange, ExchangeSummary};
pub use scheduler::{
    RunOutcome, SchedulerConfig, SyncScheduler, SyncState, SyncStatus, SyncTrigger,
};
pub use service::{SyncService, SyncStatusView};
pub use store::{
    KvBackend, LocalSnapshot, LocalStore, MemoryBackend, ReconcileSummary, SledBackend,
    SledConfig,
};
pub use tracker::{TradeDraft, Tracker};
pub use transport::{HttpTransport, SyncTransport};

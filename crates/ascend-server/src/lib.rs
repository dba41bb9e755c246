//! Ascend server
//!
//! Authoritative remote store. Each exchange carries a client's full
//! snapshot; the server merges it per kind (append-only or keyed upsert,
//! XP as a monotonic max) and answers with its resolved state.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod merge;

pub use auth::{extract_token_from_header, Claims, JwtValidator};
pub use config::ServerConfig;
pub use db::RemoteDb;
pub use error::ServerError;
pub use http::{create_router, AppState};
pub use merge::{merge_exchange, MergeReport};

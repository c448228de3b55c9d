//! Persistence - sharded SQLite storage.
//!
//! - `store`: shard cache, writes, reads, retention sweeps
//! - `schema`: per-kind tables and statements
//! - `retention`: retention windows and the daily maintenance window

mod retention;
mod schema;
mod store;

use thiserror::Error;

use crate::domain::DomainError;

pub use retention::{MaintenanceWindow, RetentionPolicy};
pub use schema::table_name;
pub use store::{ReadQuery, ShardedStore, StoreConfig, is_fresh};

/// Storage errors. These stay inside the store: `write` reports a boolean
/// and reads degrade to empty results.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record could not be routed to a shard.
    #[error("Routing error: {0}")]
    Routing(#[from] DomainError),

    /// Record lacks a field its table needs.
    #[error("Record is missing {0}")]
    MissingField(&'static str),

    /// Shard could not be opened.
    #[error("Shard unavailable")]
    ShardMissing,
}

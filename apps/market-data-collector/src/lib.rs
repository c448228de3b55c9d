#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Collector - Shared Ingestion Runtime
//!
//! Streams tickers, order books, trades, candles and private account
//! state from venue sources into per-symbol and per-account SQLite
//! shards. Exactly one process per data directory collects; it holds the
//! collector lock and starts when its first reader registers. Every other
//! process reads the same shards.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Records and their routing
//!   - `market`: data kinds, timeframes, symbols
//!   - `account`: private account identity
//!   - `record`: normalized record envelope
//!   - `shard`: shard keys and paths
//!
//! - **Application**: Port definitions and fan-out
//!   - `ports`: `MarketDataSource` and `SourceFactory`
//!   - `services`: observer registry
//!
//! - **Infrastructure**: Engine and adapters
//!   - `ingest`: plan, supervised streams, orchestrator
//!   - `persistence`: sharded store, schema, retention
//!   - `runtime`: controller, lock, worker context, signals, leases
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Venue source ──► StreamTask ──► ShardedStore ──► <venue>/<class>/<partition>.db
//!   (per group)     (per stream)       │
//!                                      └──► observers
//!
//! RuntimeLease ──► RuntimeController ──► IngestionOrchestrator
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data records and shard routing, no I/O.
pub mod domain;

/// Application layer - Port definitions and observer fan-out.
pub mod application;

/// Infrastructure layer - Ingestion, persistence and runtime lifecycle.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::DomainError;
pub use domain::account::{AccountId, Credentials};
pub use domain::market::{DataKind, MarketType, Symbol, Timeframe};
pub use domain::record::Record;
pub use domain::shard::{AssetClass, ShardKey};

// Ports
pub use application::ports::{
    MarketDataSource, PayloadStream, SourceError, SourceFactory, SourceScope, SourceSpec,
};
pub use application::services::{ObserverError, ObserverRegistry};

// Configuration
pub use infrastructure::config::{CollectorConfig, ConfigError, load_config, load_config_from_string};

// Ingestion
pub use infrastructure::ingest::{
    IngestionOrchestrator, IngestionPlan, OrchestratorError, ResubscribeConfig, STOP_OVERHEAD,
    StopReport,
};

// Persistence
pub use infrastructure::persistence::{ReadQuery, ShardedStore, StoreConfig, is_fresh};

// Runtime
pub use infrastructure::runtime::{
    ExitGuard, RuntimeController, RuntimeLease, RuntimeState, RuntimeStatus,
};

// Metrics and logging
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::init_logging;

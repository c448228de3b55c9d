//! Infrastructure Layer - Adapters and runtime machinery.
//!
//! This layer contains the shard store, the ingestion engine that drives
//! `MarketDataSource` implementations, and the process lifecycle around
//! them.

/// Collector configuration loading and validation.
pub mod config;

/// Supervised ingestion streams.
pub mod ingest;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Sharded SQLite persistence.
pub mod persistence;

/// Runtime lifecycle (controller, lock, worker, signals).
pub mod runtime;

/// Logging subscriber setup.
pub mod telemetry;

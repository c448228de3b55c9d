//! Application Layer - Port definitions and record fan-out.
//!
//! This layer contains the port interfaces that venue adapters implement
//! and the observer registry that notifies in-process consumers of
//! persisted records.

/// Port interfaces for venue connections.
pub mod ports;

/// Application services (observer notification).
pub mod services;

//! Storage and retention configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::shard::AssetClass;

/// Shard storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Days of data kept per shard.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Per-asset-class retention in days.
    #[serde(default)]
    pub retention_overrides: BTreeMap<AssetClass, u32>,
    /// Daily retention sweep.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            retention_overrides: BTreeMap::new(),
            maintenance: MaintenanceConfig::default(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl StorageConfig {
    /// Busy timeout.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Daily maintenance window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Run retention sweeps.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local time of day (`HH:MM`) after which the daily sweep may run.
    #[serde(default = "default_maintenance_time")]
    pub time: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: default_maintenance_time(),
        }
    }
}

const fn default_retention_days() -> u32 {
    7
}

const fn default_busy_timeout() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

fn default_maintenance_time() -> String {
    "02:00".to_string()
}

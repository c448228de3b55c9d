//! Runtime lifecycle configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root directory for shard files and the collector lock.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Start collection automatically when the first reader registers.
    #[serde(default = "default_true")]
    pub auto_activate: bool,
    /// Upper bound on orchestrator startup, in milliseconds.
    #[serde(default = "default_lifecycle_timeout")]
    pub startup_timeout_ms: u64,
    /// Upper bound on orchestrator shutdown, in milliseconds.
    #[serde(default = "default_lifecycle_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Delay between the last reader leaving and the runtime stopping.
    #[serde(default = "default_release_debounce")]
    pub release_debounce_ms: u64,
    /// Stop the runtime on SIGINT/SIGTERM before the process exits.
    #[serde(default = "default_true")]
    pub handle_signals: bool,
    /// Worker threads of a runtime owned by the collector.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            auto_activate: true,
            startup_timeout_ms: default_lifecycle_timeout(),
            shutdown_timeout_ms: default_lifecycle_timeout(),
            release_debounce_ms: default_release_debounce(),
            handle_signals: true,
            worker_threads: default_worker_threads(),
        }
    }
}

impl RuntimeConfig {
    /// Startup timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Release debounce window.
    #[must_use]
    pub const fn release_debounce(&self) -> Duration {
        Duration::from_millis(self.release_debounce_ms)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

const fn default_true() -> bool {
    true
}

const fn default_lifecycle_timeout() -> u64 {
    5_000
}

const fn default_release_debounce() -> u64 {
    500
}

const fn default_worker_threads() -> usize {
    2
}

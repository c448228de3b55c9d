//! Stream resubscription configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resubscription policy for failing streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before each resubscription, in milliseconds.
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    /// Consecutive failures tolerated before a stream gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Random spread applied to the delay (0.0 - 1.0).
    #[serde(default)]
    pub jitter_factor: f64,
    /// Growth factor between consecutive delays. `1.0` keeps the backoff
    /// fixed.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Ceiling for a growing delay, in milliseconds. Defaults to
    /// `backoff_ms`.
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff(),
            max_attempts: default_max_attempts(),
            jitter_factor: 0.0,
            multiplier: default_multiplier(),
            max_backoff_ms: None,
        }
    }
}

impl RetryConfig {
    /// Backoff between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Largest delay a growing backoff may reach.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.unwrap_or(self.backoff_ms).max(self.backoff_ms))
    }
}

const fn default_backoff() -> u64 {
    2_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_multiplier() -> f64 {
    1.0
}

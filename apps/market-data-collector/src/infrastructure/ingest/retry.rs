//! Resubscription Policy
//!
//! Bounded retry budget for a failing stream. Each failure consumes one
//! attempt and yields the delay to wait before resubscribing; a delivered
//! record refills the budget. Once the budget is spent the stream is
//! declared terminally failed.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::RetryConfig;

/// Configuration for resubscription behavior.
#[derive(Debug, Clone)]
pub struct ResubscribeConfig {
    /// Delay before the first resubscription.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (1.0 keeps it fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Consecutive failures tolerated (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ResubscribeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 3,
        }
    }
}

impl ResubscribeConfig {
    /// Fixed delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    /// Build from the `retry` config section.
    #[must_use]
    pub fn from_retry_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: config.backoff(),
            max_delay: config.max_backoff(),
            multiplier: config.multiplier,
            jitter_factor: config.jitter_factor,
            max_attempts: config.max_attempts,
        }
    }
}

/// Tracks consecutive failures of one stream.
#[derive(Debug)]
pub struct ResubscribePolicy {
    config: ResubscribeConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ResubscribePolicy {
    /// Create a fresh policy.
    #[must_use]
    pub const fn new(config: ResubscribeConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Consume one attempt and return the delay before it, or `None` once
    /// the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);
        Some(delay)
    }

    /// Refill the budget after a successful delivery.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts consumed since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Budget remaining.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = scaled as u64;
        Duration::from_millis(millis).min(self.config.max_delay)
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let spread = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-spread..=spread);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}

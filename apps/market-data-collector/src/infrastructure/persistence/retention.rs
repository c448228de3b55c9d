//! Retention policy and the daily maintenance window.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::domain::shard::AssetClass;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long rows are kept, per asset class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    default_days: u32,
    overrides: BTreeMap<AssetClass, u32>,
}

impl RetentionPolicy {
    /// Same window for every class.
    #[must_use]
    pub const fn uniform(days: u32) -> Self {
        Self {
            default_days: days,
            overrides: BTreeMap::new(),
        }
    }

    /// Default window plus per-class overrides.
    #[must_use]
    pub const fn with_overrides(default_days: u32, overrides: BTreeMap<AssetClass, u32>) -> Self {
        Self {
            default_days,
            overrides,
        }
    }

    /// Days kept for `class`.
    #[must_use]
    pub fn days_for(&self, class: AssetClass) -> u32 {
        self.overrides
            .get(&class)
            .copied()
            .unwrap_or(self.default_days)
    }

    /// Rows with a timestamp below the returned value are expired.
    #[must_use]
    pub fn cutoff_ms(&self, class: AssetClass, now_ms: i64) -> i64 {
        let window = DAY.saturating_mul(self.days_for(class));
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(window_ms)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::uniform(7)
    }
}

/// Local time of day after which the daily sweep may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    at: NaiveTime,
}

impl MaintenanceWindow {
    /// Window opening at `at`.
    #[must_use]
    pub const fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Parse `HH:MM`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        NaiveTime::parse_from_str(text.trim(), "%H:%M")
            .ok()
            .map(Self::new)
    }

    /// Opening time.
    #[must_use]
    pub const fn at(&self) -> NaiveTime {
        self.at
    }

    /// A sweep is due once per local day, after the opening time.
    #[must_use]
    pub fn is_due(&self, now: NaiveDateTime, last_sweep: Option<NaiveDate>) -> bool {
        now.time() >= self.at && last_sweep != Some(now.date())
    }
}

impl Default for MaintenanceWindow {
    fn default() -> Self {
        Self::new(NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

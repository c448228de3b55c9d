//! Collection configuration: which kinds, how often, which candles.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::market::{DataKind, Timeframe};

/// Per-kind switch and polling interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    /// Collect this kind.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Polling interval for pull-based kinds, in milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

const fn default_enabled() -> bool {
    true
}

/// Collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Per-kind overrides. Kinds not listed are enabled with defaults.
    #[serde(default)]
    pub kinds: BTreeMap<DataKind, KindConfig>,
    /// Candle timeframes to collect.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    /// Order book depth requested from venues.
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: Option<u32>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            kinds: BTreeMap::new(),
            timeframes: default_timeframes(),
            order_book_depth: default_order_book_depth(),
        }
    }
}

impl CollectionConfig {
    /// Whether `kind` is collected.
    #[must_use]
    pub fn is_enabled(&self, kind: DataKind) -> bool {
        self.kinds.get(&kind).is_none_or(|k| k.enabled)
    }

    /// Polling interval for `kind`.
    #[must_use]
    pub fn interval(&self, kind: DataKind) -> Duration {
        self.kinds
            .get(&kind)
            .and_then(|k| k.interval_ms)
            .map_or_else(|| kind.default_interval(), Duration::from_millis)
    }

    /// Parsed timeframes; entries that fail to parse are skipped.
    #[must_use]
    pub fn parsed_timeframes(&self) -> Vec<Timeframe> {
        self.timeframes
            .iter()
            .filter_map(|tf| tf.parse().ok())
            .collect()
    }
}

fn default_timeframes() -> Vec<String> {
    vec!["1h".to_string(), "4h".to_string()]
}

#[allow(clippy::unnecessary_wraps)]
const fn default_order_book_depth() -> Option<u32> {
    Some(20)
}

//! Configuration module for the market data collector.
//!
//! Loads the collector's YAML configuration, interpolates `${VAR}` and
//! `${VAR:-default}` references, applies `MDC_*` environment overrides
//! and validates the result.
//!
//! # Usage
//!
//! ```rust,ignore
//! use market_data_collector::infrastructure::config::load_config;
//!
//! let config = load_config(Some("collector.yaml".as_ref()))?;
//! println!("data dir: {}", config.runtime.data_dir.display());
//! ```
//!
//! # Environment Overrides
//!
//! | Variable            | Effect                                        |
//! |---------------------|-----------------------------------------------|
//! | `MDC_DATA_DIR`      | `runtime.data_dir`                            |
//! | `MDC_SYMBOLS`       | comma list replacing every enabled venue's symbols |
//! | `MDC_LOG_LEVEL`     | `logging.level`                               |
//! | `MDC_AUTO_ACTIVATE` | `runtime.auto_activate` (`true`/`false`)      |

mod collection;
mod logging;
mod retry;
mod runtime;
mod storage;
mod venues;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::market::Symbol;

pub use collection::{CollectionConfig, KindConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use retry::RetryConfig;
pub use runtime::RuntimeConfig;
pub use storage::{MaintenanceConfig, StorageConfig};
pub use venues::{AccountConfig, VenueConfig};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "collector.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// An `MDC_*` override could not be applied.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Runtime lifecycle.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Venues keyed by name.
    #[serde(default)]
    pub venues: BTreeMap<String, VenueConfig>,
    /// Kinds, intervals and timeframes.
    #[serde(default)]
    pub collection: CollectionConfig,
    /// Stream resubscription.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Shard storage and retention.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CollectorConfig {
    /// Path of the collector lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.runtime.data_dir.join(".mdc.lock")
    }

    /// Enabled venues.
    pub fn enabled_venues(&self) -> impl Iterator<Item = (&String, &VenueConfig)> {
        self.venues.iter().filter(|(_, venue)| venue.enabled)
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file.
///
/// Reads `.env` if present, interpolates environment variables, applies
/// `MDC_*` overrides and validates.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to `collector.yaml`.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&Path>) -> Result<CollectorConfig, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        tracing::warn!(error = %e, "Failed to load .env file");
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let interpolated = interpolate_env_vars(&contents);
    let mut config: CollectorConfig = serde_yaml_bw::from_str(&interpolated)?;
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing).
///
/// Environment variables are interpolated; `MDC_*` overrides are not applied.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<CollectorConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: CollectorConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
fn interpolate_env_vars(input: &str) -> String {
    interpolate_with(input, |var| std::env::var(var).ok())
}

fn interpolate_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static ENV_VAR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

    let Some(re) = ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
    else {
        return input.to_string();
    };

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).and_then(|var| lookup(var.as_str())) {
            Some(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Apply `MDC_*` overrides through `lookup`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidOverride` when `MDC_AUTO_ACTIVATE` is not a
/// boolean.
pub fn apply_env_overrides<F>(config: &mut CollectorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(dir) = lookup("MDC_DATA_DIR") {
        config.runtime.data_dir = PathBuf::from(dir.trim());
    }

    if let Some(list) = lookup("MDC_SYMBOLS") {
        let symbols: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for venue in config.venues.values_mut().filter(|v| v.enabled) {
            venue.symbols.clone_from(&symbols);
        }
    }

    if let Some(level) = lookup("MDC_LOG_LEVEL") {
        config.logging.level = level.trim().to_ascii_lowercase();
    }

    if let Some(value) = lookup("MDC_AUTO_ACTIVATE") {
        config.runtime.auto_activate = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    var: "MDC_AUTO_ACTIVATE",
                    value,
                });
            }
        };
    }

    Ok(())
}

/// Validate configuration values.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` describing the first violation.
pub fn validate_config(config: &CollectorConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

    let has_work = config
        .enabled_venues()
        .any(|(_, v)| !v.symbols.is_empty() || !v.accounts.is_empty());
    if !has_work {
        return invalid("at least one enabled venue needs symbols or accounts".to_string());
    }

    for (name, venue) in config.enabled_venues() {
        if name.trim().is_empty() {
            return invalid("venue names must not be empty".to_string());
        }
        for symbol in &venue.symbols {
            if let Err(e) = Symbol::parse(symbol) {
                return invalid(format!("venues.{name}: {e}"));
            }
        }
    }

    for tf in &config.collection.timeframes {
        if let Err(e) = tf.parse::<crate::domain::market::Timeframe>() {
            return invalid(format!("collection.timeframes: {e}"));
        }
    }

    if config.collection.order_book_depth == Some(0) {
        return invalid("collection.order_book_depth must be positive".to_string());
    }

    for (kind, settings) in &config.collection.kinds {
        if settings.interval_ms == Some(0) {
            return invalid(format!("collection.kinds.{kind}.interval_ms must be positive"));
        }
    }

    if NaiveTime::parse_from_str(&config.storage.maintenance.time, "%H:%M").is_err() {
        return invalid(format!(
            "storage.maintenance.time must be HH:MM, got '{}'",
            config.storage.maintenance.time
        ));
    }

    if config.storage.retention_days == 0 {
        return invalid("storage.retention_days must be positive".to_string());
    }

    let rt = &config.runtime;
    if rt.startup_timeout_ms == 0 || rt.shutdown_timeout_ms == 0 {
        return invalid("runtime startup/shutdown timeouts must be positive".to_string());
    }
    if rt.worker_threads == 0 {
        return invalid("runtime.worker_threads must be positive".to_string());
    }

    if config.retry.backoff_ms == 0 {
        return invalid("retry.backoff_ms must be positive".to_string());
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_factor) {
        return invalid("retry.jitter_factor must be between 0.0 and 1.0".to_string());
    }
    if !config.retry.multiplier.is_finite() || config.retry.multiplier < 1.0 {
        return invalid("retry.multiplier must be at least 1.0".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::market::{DataKind, Timeframe};
    use crate::domain::shard::AssetClass;

    const MINIMAL: &str = r"
venues:
  binance:
    symbols: [BTC/USDT]
";

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_string(MINIMAL).unwrap();

        assert_eq!(config.runtime.data_dir, PathBuf::from("./data"));
        assert!(config.runtime.auto_activate);
        assert_eq!(config.runtime.startup_timeout(), Duration::from_secs(5));
        assert_eq!(config.runtime.release_debounce(), Duration::from_millis(500));
        assert_eq!(config.retry.backoff(), Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.storage.retention_days, 7);
        assert_eq!(config.storage.maintenance.time, "02:00");
        assert_eq!(
            config.collection.parsed_timeframes(),
            vec![Timeframe::H1, Timeframe::H4]
        );
        assert_eq!(config.collection.order_book_depth, Some(20));
        assert_eq!(config.lock_path(), PathBuf::from("./data/.mdc.lock"));
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
runtime:
  data_dir: /tmp/mdc
  auto_activate: false
  release_debounce_ms: 250
venues:
  binance:
    testnet: true
    symbols: ["BTC/USDT", "ETH/USDT:USDT"]
    accounts:
      main:
        api_key: abcdef123
        secret: s3cret
  okx:
    enabled: false
collection:
  kinds:
    orderbook: { enabled: false }
    balance: { interval_ms: 5000 }
  timeframes: ["1m", "1d"]
storage:
  retention_days: 3
  retention_overrides:
    futures: 14
  maintenance:
    time: "03:30"
logging:
  level: debug
  format: json
"#;
        let config = load_config_from_string(yaml).unwrap();

        assert!(!config.runtime.auto_activate);
        assert_eq!(config.runtime.release_debounce(), Duration::from_millis(250));
        assert_eq!(config.enabled_venues().count(), 1);
        let binance = &config.venues["binance"];
        assert!(binance.testnet);
        assert_eq!(binance.accounts["main"].api_key, "abcdef123");
        assert!(!config.collection.is_enabled(DataKind::OrderBook));
        assert!(config.collection.is_enabled(DataKind::Ticker));
        assert_eq!(
            config.collection.interval(DataKind::Balance),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.collection.interval(DataKind::Order),
            DataKind::Order.default_interval()
        );
        assert_eq!(
            config.storage.retention_overrides.get(&AssetClass::Derivative),
            Some(&14)
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "mode: ${MDC_CONFIG_TEST_NONEXISTENT_VAR:-spot}";
        assert_eq!(interpolate_env_vars(input), "mode: spot");
    }

    #[test]
    fn test_env_var_uses_lookup_value() {
        let result = interpolate_with("key: ${API_KEY:-none}", |var| {
            (var == "API_KEY").then(|| "abc".to_string())
        });
        assert_eq!(result, "key: abc");
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "api_key: ${MDC_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        assert_eq!(interpolate_env_vars(input), "api_key: ");
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = load_config_from_string(MINIMAL).unwrap();
        let env: BTreeMap<&str, &str> = [
            ("MDC_DATA_DIR", "/var/lib/mdc"),
            ("MDC_SYMBOLS", "SOL/USDT, XRP/USDT:USDT"),
            ("MDC_LOG_LEVEL", "DEBUG"),
            ("MDC_AUTO_ACTIVATE", "off"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |var| env.get(var).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.runtime.data_dir, PathBuf::from("/var/lib/mdc"));
        assert_eq!(
            config.venues["binance"].symbols,
            vec!["SOL/USDT".to_string(), "XRP/USDT:USDT".to_string()]
        );
        assert_eq!(config.logging.level, "debug");
        assert!(!config.runtime.auto_activate);
    }

    #[test]
    fn test_invalid_auto_activate_override() {
        let mut config = load_config_from_string(MINIMAL).unwrap();
        let result = apply_env_overrides(&mut config, |var| {
            (var == "MDC_AUTO_ACTIVATE").then(|| "maybe".to_string())
        });
        let Err(err) = result else {
            panic!("expected override error");
        };
        assert!(err.to_string().contains("MDC_AUTO_ACTIVATE"));
    }

    #[test]
    fn test_validation_requires_work() {
        let result = load_config_from_string("venues: {}");
        let Err(err) = result else {
            panic!("expected validation error");
        };
        assert!(err.to_string().contains("at least one enabled venue"));
    }

    #[test]
    fn test_validation_invalid_symbol() {
        let yaml = "venues:\n  binance:\n    symbols: [BTCUSDT]\n";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected validation error");
        };
        assert!(err.to_string().contains("BTCUSDT"));
    }

    #[test]
    fn test_validation_invalid_timeframe() {
        let yaml = format!("{MINIMAL}collection:\n  timeframes: [\"7m\"]\n");
        let Err(err) = load_config_from_string(&yaml) else {
            panic!("expected validation error");
        };
        assert!(err.to_string().contains("7m"));
    }

    #[test]
    fn test_validation_invalid_maintenance_time() {
        let yaml = format!("{MINIMAL}storage:\n  maintenance:\n    time: \"25:99\"\n");
        let Err(err) = load_config_from_string(&yaml) else {
            panic!("expected validation error");
        };
        assert!(err.to_string().contains("HH:MM"));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let yaml = format!("{MINIMAL}runtime:\n  startup_timeout_ms: 0\n");
        assert!(load_config_from_string(&yaml).is_err());
    }

    #[test]
    fn test_validation_shrinking_retry_multiplier() {
        let yaml = format!("{MINIMAL}retry:\n  multiplier: 0.5\n");
        let Err(err) = load_config_from_string(&yaml) else {
            panic!("expected validation error");
        };
        assert!(err.to_string().contains("retry.multiplier"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Some(Path::new("/nonexistent/collector.yaml")));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_account_debug_is_redacted() {
        let account = AccountConfig {
            api_key: "visible-key".into(),
            secret: "visible-secret".into(),
            password: None,
            uid: None,
        };
        let debug = format!("{account:?}");
        assert!(!debug.contains("visible"));
    }
}

//! Logging Setup
//!
//! Installs a `tracing` subscriber with an `EnvFilter` and a `fmt` layer.
//! `RUST_LOG` directives win over the configured level.
//!
//! # Usage
//!
//! ```ignore
//! use market_data_collector::infrastructure::telemetry;
//!
//! telemetry::init_logging(&config.logging);
//! tracing::info!(venue = "binance", "Collecting");
//! ```
//!
//! The collector is a library: an embedding application that already
//! installed a subscriber keeps it, and this call becomes a no-op.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::{LogFormat, LoggingConfig};

/// Crate target used in filter directives.
const CRATE_TARGET: &str = "market_data_collector";

/// Build the filter for `config`.
#[must_use]
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let filter = EnvFilter::from_default_env();
    match crate_directive(&config.level) {
        Some(directive) => filter.add_directive(directive),
        None => {
            eprintln!(
                "Invalid log level '{}', falling back to info",
                config.level
            );
            match crate_directive("info") {
                Some(directive) => filter.add_directive(directive),
                None => filter,
            }
        }
    }
}

fn crate_directive(level: &str) -> Option<Directive> {
    format!("{CRATE_TARGET}={}", level.trim()).parse().ok()
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = build_filter(config);
    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
    };
    result.is_ok()
}

// =============================================================================
// Tests
// =============================================================================

//! Prometheus Metrics Module
//!
//! Counters and gauges for the ingestion runtime. Recording goes through
//! the `metrics` facade and is a no-op until a recorder is installed, so
//! embedding applications opt in by calling [`init_metrics`].
//!
//! # Metrics Categories
//!
//! - **Persistence**: records written, write failures, rows swept
//! - **Streams**: resubscriptions, terminal failures, active tasks
//! - **Observers**: callback failures
//! - **Runtime**: running flag and registered readers

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::market::DataKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder once per process.
///
/// Returns `None` when another recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus recorder not installed");
                None
            }
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned().flatten()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "mdc_records_persisted_total",
        "Records written to shard storage by kind"
    );
    describe_counter!(
        "mdc_write_failures_total",
        "Records that could not be written, by kind"
    );
    describe_counter!(
        "mdc_retention_rows_deleted_total",
        "Rows removed by retention sweeps"
    );
    describe_histogram!(
        "mdc_write_seconds",
        "Time to persist one record, by kind"
    );

    describe_counter!(
        "mdc_stream_retries_total",
        "Stream resubscriptions after a failure, by kind"
    );
    describe_counter!(
        "mdc_stream_failures_total",
        "Streams that exhausted their retry budget, by kind"
    );
    describe_gauge!("mdc_active_streams", "Running ingestion tasks");

    describe_counter!(
        "mdc_observer_failures_total",
        "Observer callbacks that failed, by kind"
    );

    describe_gauge!("mdc_runtime_running", "1 while this process collects");
    describe_gauge!("mdc_runtime_readers", "Registered readers");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a persisted record.
pub fn record_persisted(kind: DataKind) {
    counter!("mdc_records_persisted_total", "kind" => kind.as_str()).increment(1);
}

/// Record a failed write.
pub fn record_write_failure(kind: DataKind) {
    counter!("mdc_write_failures_total", "kind" => kind.as_str()).increment(1);
}

/// Record how long a write took.
pub fn record_write_duration(kind: DataKind, duration: Duration) {
    histogram!("mdc_write_seconds", "kind" => kind.as_str()).record(duration.as_secs_f64());
}

/// Record rows removed by a retention sweep.
pub fn record_retention_deleted(rows: usize) {
    counter!("mdc_retention_rows_deleted_total").increment(rows as u64);
}

/// Record a stream resubscription.
pub fn record_stream_retry(kind: DataKind) {
    counter!("mdc_stream_retries_total", "kind" => kind.as_str()).increment(1);
}

/// Record a stream that gave up.
pub fn record_stream_failure(kind: DataKind) {
    counter!("mdc_stream_failures_total", "kind" => kind.as_str()).increment(1);
}

/// Record failed observer callbacks.
pub fn record_observer_failures(kind: DataKind, count: usize) {
    counter!("mdc_observer_failures_total", "kind" => kind.as_str()).increment(count as u64);
}

/// Update the active stream count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(count: usize) {
    gauge!("mdc_active_streams").set(count as f64);
}

/// Update the running flag.
pub fn set_runtime_running(running: bool) {
    gauge!("mdc_runtime_running").set(if running { 1.0 } else { 0.0 });
}

/// Update the reader count.
#[allow(clippy::cast_precision_loss)]
pub fn set_readers(count: usize) {
    gauge!("mdc_runtime_readers").set(count as f64);
}

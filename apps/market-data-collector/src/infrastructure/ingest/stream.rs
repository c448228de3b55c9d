//! Stream Task
//!
//! One supervised ingestion loop per [`StreamSpec`]. Push kinds hold a
//! subscription open; pull kinds poll on their interval. Every payload is
//! normalized into records, persisted on the blocking pool and then
//! handed to the observers of its kind.
//!
//! Failures consume the resubscription budget; a delivered record
//! refills it. Cancellation is observed at every await point.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::plan::StreamSpec;
use super::retry::{ResubscribeConfig, ResubscribePolicy};
use crate::application::ports::{MarketDataSource, PayloadStream, SourceError, SourceScope};
use crate::application::services::ObserverRegistry;
use crate::domain::market::DataKind;
use crate::domain::record::{Record, now_millis};
use crate::infrastructure::metrics;
use crate::infrastructure::persistence::ShardedStore;

/// Columns of an OHLCV row, in venue order.
const OHLCV_FIELDS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Why a stream task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamExit {
    /// Cancelled by the orchestrator.
    Cancelled,
    /// Retry budget spent.
    Exhausted,
    /// The venue does not offer this stream.
    Unsupported,
}

/// Shared sinks every task writes into.
#[derive(Debug, Clone)]
pub struct StreamSinks {
    /// Shard store.
    pub store: Arc<ShardedStore>,
    /// Observer callbacks.
    pub observers: Arc<ObserverRegistry>,
}

/// A single supervised stream.
pub struct StreamTask {
    spec: StreamSpec,
    source: Arc<dyn MarketDataSource>,
    sinks: StreamSinks,
    retry: ResubscribeConfig,
    cancel: CancellationToken,
}

impl StreamTask {
    /// Create a task.
    #[must_use]
    pub fn new(
        spec: StreamSpec,
        source: Arc<dyn MarketDataSource>,
        sinks: StreamSinks,
        retry: ResubscribeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            source,
            sinks,
            retry,
            cancel,
        }
    }

    /// Run until cancelled, unsupported or out of retries.
    pub async fn run(self) -> StreamExit {
        let label = self.spec.label();
        let mut policy = ResubscribePolicy::new(self.retry.clone());
        let mut depth = self.spec.depth;
        tracing::debug!(stream = %label, "Stream started");

        loop {
            if self.cancel.is_cancelled() {
                return StreamExit::Cancelled;
            }

            let error = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(stream = %label, "Stream cancelled");
                    return StreamExit::Cancelled;
                }
                error = self.session(&mut policy, &mut depth) => error,
            };

            if error.is_permanent() {
                tracing::warn!(stream = %label, error = %error, "Stream not available on venue");
                return StreamExit::Unsupported;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    stream = %label,
                    attempts = policy.attempt_count(),
                    error = %error,
                    "Stream failed permanently"
                );
                metrics::record_stream_failure(self.spec.kind);
                return StreamExit::Exhausted;
            };

            tracing::warn!(
                stream = %label,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                error = %error,
                "Resubscribing"
            );
            metrics::record_stream_retry(self.spec.kind);

            tokio::select! {
                () = self.cancel.cancelled() => return StreamExit::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one subscription (or polling run) until it fails.
    async fn session(&self, policy: &mut ResubscribePolicy, depth: &mut Option<u32>) -> SourceError {
        if self.spec.kind.is_streamed() {
            let mut stream = match self.subscribe(depth).await {
                Ok(stream) => stream,
                Err(e) => return e,
            };
            loop {
                match stream.next().await {
                    Some(Ok(payload)) => {
                        self.ingest(payload).await;
                        policy.reset();
                    }
                    Some(Err(e)) => return e,
                    None => return SourceError::StreamClosed,
                }
            }
        }

        loop {
            match self.fetch().await {
                Ok(payloads) => {
                    for payload in payloads {
                        self.ingest(payload).await;
                    }
                    policy.reset();
                }
                Err(e) => return e,
            }
            tokio::time::sleep(self.spec.poll_interval).await;
        }
    }

    async fn subscribe(&self, depth: &mut Option<u32>) -> Result<PayloadStream, SourceError> {
        let symbol = self.spec.symbol.as_deref().unwrap_or_default();
        match self.spec.kind {
            DataKind::Ticker => self.source.stream_ticker(symbol).await,
            DataKind::OrderBook => match self.source.stream_order_book(symbol, *depth).await {
                Err(SourceError::InvalidRequest { message }) if depth.is_some() => {
                    tracing::warn!(
                        stream = %self.spec.label(),
                        depth = ?depth,
                        reason = %message,
                        "Depth rejected, using venue default"
                    );
                    *depth = None;
                    self.source.stream_order_book(symbol, None).await
                }
                other => other,
            },
            DataKind::Trade => self.source.stream_trades(symbol).await,
            DataKind::Candle => match self.spec.timeframe {
                Some(timeframe) => self.source.stream_candles(symbol, timeframe).await,
                None => Err(SourceError::Unsupported {
                    operation: "stream_candles",
                }),
            },
            _ => Err(SourceError::Unsupported { operation: "stream" }),
        }
    }

    async fn fetch(&self) -> Result<Vec<Value>, SourceError> {
        match self.spec.kind {
            DataKind::Balance => self.source.fetch_balance().await.map(|b| vec![b]),
            DataKind::Order => self.source.fetch_open_orders().await,
            DataKind::Fill => self.source.fetch_my_trades().await,
            DataKind::Position => self.source.fetch_positions().await,
            _ => Err(SourceError::Unsupported { operation: "fetch" }),
        }
    }

    async fn ingest(&self, payload: Value) {
        for record in normalize(&self.spec, payload, now_millis()) {
            self.persist(record).await;
        }
    }

    async fn persist(&self, record: Record) {
        let kind = record.kind;
        let store = Arc::clone(&self.sinks.store);
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let written = store.write(&record);
            (written, record)
        })
        .await;
        metrics::record_write_duration(kind, started.elapsed());

        match outcome {
            Ok((true, record)) => {
                let failures = self.sinks.observers.notify(&record);
                if failures > 0 {
                    metrics::record_observer_failures(kind, failures);
                }
            }
            // The store logged and counted it.
            Ok((false, _)) => {}
            Err(e) => {
                tracing::error!(stream = %self.spec.label(), error = %e, "Write task failed");
                metrics::record_write_failure(kind);
            }
        }
    }
}

/// Turn one venue payload into zero or more records.
///
/// Trade batches are split per trade. Candle payloads keep only the
/// newest row, reshaped into a document. Private kinds are attributed to
/// the stream's account.
#[must_use]
pub fn normalize(spec: &StreamSpec, payload: Value, collected_at: i64) -> Vec<Record> {
    let venue = spec.venue.as_str();
    let symbol = spec.symbol.as_deref().unwrap_or_default();

    if spec.kind.is_private() {
        let SourceScope::Private(account) = &spec.scope else {
            tracing::warn!(stream = %spec.label(), "Private kind on a public source");
            return Vec::new();
        };
        return vec![Record::private(
            venue,
            account.clone(),
            spec.kind,
            payload,
            collected_at,
        )];
    }

    match spec.kind {
        DataKind::Trade => match payload {
            Value::Array(trades) => trades
                .into_iter()
                .map(|trade| Record::market(venue, symbol, DataKind::Trade, trade, collected_at))
                .collect(),
            single => vec![Record::market(venue, symbol, DataKind::Trade, single, collected_at)],
        },
        DataKind::Candle => {
            let (Some(timeframe), Some(document)) = (spec.timeframe, latest_candle(payload)) else {
                return Vec::new();
            };
            vec![Record::candle(venue, symbol, timeframe, document, collected_at)]
        }
        kind => vec![Record::market(venue, symbol, kind, payload, collected_at)],
    }
}

/// Newest candle as a `{timestamp, open, high, low, close, volume}`
/// document.
fn latest_candle(payload: Value) -> Option<Value> {
    let row = match payload {
        Value::Array(rows) if rows.first().is_some_and(Value::is_array) => rows.into_iter().last()?,
        Value::Array(rows) if rows.is_empty() => return None,
        other => other,
    };
    match row {
        Value::Array(columns) if columns.len() >= OHLCV_FIELDS.len() => {
            let mut document = json!({});
            for (field, value) in OHLCV_FIELDS.iter().zip(columns) {
                document[*field] = value;
            }
            Some(document)
        }
        Value::Object(_) => Some(row),
        _ => None,
    }
}

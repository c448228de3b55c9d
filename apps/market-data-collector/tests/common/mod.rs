//! Shared fixtures: a scripted in-memory venue source and test configs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::Value;

use market_data_collector::infrastructure::config::{KindConfig, VenueConfig};
use market_data_collector::{
    CollectorConfig, DataKind, MarketDataSource, PayloadStream, SourceError, SourceFactory,
    SourceSpec, Timeframe,
};

// =============================================================================
// Fake Source
// =============================================================================

/// Source that replays scripted payloads on every subscription.
#[derive(Default)]
pub struct FakeSource {
    pub tickers: Mutex<Vec<Value>>,
    pub trades: Mutex<Vec<Value>>,
    pub candles: Mutex<Vec<Value>>,
    pub books: Mutex<Vec<Value>>,
    pub balance: Mutex<Option<Value>>,
    /// Subscriptions that fail before one succeeds.
    pub subscribe_failures: AtomicUsize,
    /// End streams after their payloads instead of idling.
    pub end_streams: AtomicBool,
    /// Reject explicit order book depths.
    pub reject_depth: AtomicBool,
    /// `close` never completes.
    pub hang_close: AtomicBool,
    pub subscriptions: AtomicUsize,
    pub closes: AtomicUsize,
    pub depths: Mutex<Vec<Option<u32>>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tickers(payloads: Vec<Value>) -> Arc<Self> {
        let source = Self::default();
        *source.tickers.lock().unwrap() = payloads;
        Arc::new(source)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn replay(&self, payloads: &Mutex<Vec<Value>>) -> Result<PayloadStream, SourceError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .subscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::connection("scripted failure"));
        }

        let items = stream::iter(payloads.lock().unwrap().clone().into_iter().map(Ok));
        if self.end_streams.load(Ordering::SeqCst) {
            Ok(items.boxed())
        } else {
            Ok(items.chain(stream::pending()).boxed())
        }
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    async fn stream_ticker(&self, _symbol: &str) -> Result<PayloadStream, SourceError> {
        self.replay(&self.tickers)
    }

    async fn stream_order_book(
        &self,
        _symbol: &str,
        depth: Option<u32>,
    ) -> Result<PayloadStream, SourceError> {
        self.depths.lock().unwrap().push(depth);
        if depth.is_some() && self.reject_depth.load(Ordering::SeqCst) {
            return Err(SourceError::InvalidRequest {
                message: "depth not allowed".to_string(),
            });
        }
        self.replay(&self.books)
    }

    async fn stream_trades(&self, _symbol: &str) -> Result<PayloadStream, SourceError> {
        self.replay(&self.trades)
    }

    async fn stream_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<PayloadStream, SourceError> {
        self.replay(&self.candles)
    }

    async fn fetch_balance(&self) -> Result<Value, SourceError> {
        self.balance
            .lock()
            .unwrap()
            .clone()
            .ok_or(SourceError::Unsupported {
                operation: "fetch_balance",
            })
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// =============================================================================
// Fake Factory
// =============================================================================

/// Hands out one shared [`FakeSource`] for every spec.
pub struct FakeFactory {
    pub source: Arc<FakeSource>,
    pub connects: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// Blocks every `connect` this long, like a slow venue handshake.
    pub connect_delay: Mutex<Option<Duration>>,
    pub specs: Mutex<Vec<SourceSpec>>,
}

impl FakeFactory {
    pub fn new(source: Arc<FakeSource>) -> Arc<Self> {
        Arc::new(Self {
            source,
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            specs: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(source: Arc<FakeSource>, delay: Duration) -> Arc<Self> {
        let factory = Self::new(source);
        *factory.connect_delay.lock().unwrap() = Some(delay);
        factory
    }

    pub fn failing() -> Arc<Self> {
        let factory = Self::new(FakeSource::new());
        factory.fail_connect.store(true, Ordering::SeqCst);
        factory
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SourceFactory for FakeFactory {
    fn connect(&self, spec: &SourceSpec) -> Result<Arc<dyn MarketDataSource>, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SourceError::connection("venue unreachable"));
        }
        Ok(Arc::clone(&self.source) as Arc<dyn MarketDataSource>)
    }
}

// =============================================================================
// Config and Helpers
// =============================================================================

/// One venue `alpha` with `BTC/USDT`, collecting only `kinds`. Signals
/// off, short debounce and retry backoff.
pub fn config(data_dir: &Path, kinds: &[DataKind]) -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.runtime.data_dir = data_dir.to_path_buf();
    config.runtime.handle_signals = false;
    config.runtime.release_debounce_ms = 100;
    config.runtime.startup_timeout_ms = 2_000;
    config.runtime.shutdown_timeout_ms = 1_000;
    config.runtime.worker_threads = 2;
    config.retry.backoff_ms = 20;
    config.retry.max_attempts = 3;
    config.storage.maintenance.enabled = false;

    for kind in DataKind::all() {
        config.collection.kinds.insert(
            *kind,
            KindConfig {
                enabled: kinds.contains(kind),
                interval_ms: Some(50),
            },
        );
    }

    config.venues.insert(
        "alpha".to_string(),
        VenueConfig {
            symbols: vec!["BTC/USDT".to_string()],
            ..VenueConfig::default()
        },
    );
    config
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Async variant of [`wait_for`].
pub async fn wait_for_async(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

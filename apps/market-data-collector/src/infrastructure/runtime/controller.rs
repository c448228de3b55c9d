//! Runtime Controller
//!
//! Process-wide owner of the collection runtime. Tracks registered
//! readers, starts ingestion when the first reader arrives (if
//! `auto_activate` is set) and stops it a debounce interval after the
//! last one leaves. Only the process holding the collector lock runs
//! ingestion; every other process reads the shards the holder writes.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──start──▶ Starting ──ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                       │
//!                       └──lock held / failure / timeout──▶ Stopped
//! ```
//!
//! Two mutexes guard the controller. `lifecycle` serializes start and stop
//! and owns the lock token and worker; `control` holds the state, the
//! reader count and the pending debounced stop. `lifecycle` is always
//! taken first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::lease::RuntimeLease;
use super::lock::{LockError, LockToken};
use super::signals::{self, ExitGuard};
use super::worker::{WorkerContext, WorkerError};
use crate::application::ports::SourceFactory;
use crate::application::services::{ObserverError, ObserverRegistry};
use crate::domain::market::DataKind;
use crate::domain::record::Record;
use crate::infrastructure::config::CollectorConfig;
use crate::infrastructure::ingest::{
    IngestionOrchestrator, IngestionPlan, OrchestratorError, ResubscribeConfig, STOP_OVERHEAD,
};
use crate::infrastructure::metrics;
use crate::infrastructure::persistence::{ShardedStore, StoreConfig};

/// Extra time the shutdown job gets beyond the orchestrator's own bound.
const STOP_GRACE: Duration = Duration::from_millis(250);

static GLOBAL_CONTROLLER: OnceLock<RuntimeController> = OnceLock::new();

// =============================================================================
// State
// =============================================================================

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Not collecting.
    Stopped,
    /// Acquiring the lock and launching streams.
    Starting,
    /// Collecting.
    Running,
    /// Shutting streams down.
    Stopping,
}

impl RuntimeState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    /// Lifecycle state.
    pub state: RuntimeState,
    /// Registered readers.
    pub readers: usize,
    /// Running stream tasks.
    pub active_streams: usize,
    /// A debounced stop is scheduled.
    pub stop_pending: bool,
    /// Lock file path.
    pub lock_path: String,
}

struct PendingStop {
    id: u64,
    timer: AbortHandle,
}

struct ControlState {
    state: RuntimeState,
    readers: usize,
    pending_stop: Option<PendingStop>,
    next_stop_id: u64,
    worker: Option<Handle>,
    orchestrator: Option<Arc<IngestionOrchestrator>>,
}

impl ControlState {
    fn cancel_pending_stop(&mut self) -> bool {
        match self.pending_stop.take() {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }
}

struct ActiveRuntime {
    lock: LockToken,
    worker: WorkerContext,
    orchestrator: Arc<IngestionOrchestrator>,
}

#[derive(Debug, thiserror::Error)]
enum StartFailure {
    #[error("collector lock is held by another process")]
    LockHeld,
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

struct Inner {
    config: CollectorConfig,
    factory: Arc<dyn SourceFactory>,
    store: Arc<ShardedStore>,
    observers: Arc<ObserverRegistry>,
    lifecycle: Mutex<Option<ActiveRuntime>>,
    control: Mutex<ControlState>,
    signals_installed: AtomicBool,
}

// =============================================================================
// Controller
// =============================================================================

/// Reference-counted owner of the collection runtime. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeController {
    inner: Arc<Inner>,
}

impl RuntimeController {
    /// Create a controller. Nothing starts until [`Self::acquire`] or
    /// [`Self::start`].
    #[must_use]
    pub fn new(config: CollectorConfig, factory: Arc<dyn SourceFactory>) -> Self {
        let store = Arc::new(ShardedStore::new(StoreConfig::from_config(&config)));
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                store,
                observers: Arc::new(ObserverRegistry::new()),
                lifecycle: Mutex::new(None),
                control: Mutex::new(ControlState {
                    state: RuntimeState::Stopped,
                    readers: 0,
                    pending_stop: None,
                    next_stop_id: 0,
                    worker: None,
                    orchestrator: None,
                }),
                signals_installed: AtomicBool::new(false),
            }),
        }
    }

    /// Create the process-wide controller on first call and return it.
    ///
    /// Later calls return the existing controller and ignore their
    /// arguments.
    pub fn initialize(config: CollectorConfig, factory: Arc<dyn SourceFactory>) -> &'static Self {
        if let Some(existing) = GLOBAL_CONTROLLER.get() {
            tracing::debug!("Collector controller already initialized");
            return existing;
        }
        GLOBAL_CONTROLLER.get_or_init(|| Self::new(config, factory))
    }

    /// The process-wide controller, if initialized.
    #[must_use]
    pub fn global() -> Option<&'static Self> {
        GLOBAL_CONTROLLER.get()
    }

    // -------------------------------------------------------------------------
    // Reader accounting
    // -------------------------------------------------------------------------

    /// Register a reader. The first reader starts collection when
    /// `auto_activate` is set. Cancels a pending debounced stop.
    ///
    /// Returns the new reader count.
    pub fn acquire(&self) -> usize {
        let (readers, should_start) = {
            let mut control = self.inner.control.lock();
            control.readers += 1;
            if control.cancel_pending_stop() {
                tracing::debug!("Pending stop cancelled by new reader");
            }
            let should_start = control.readers == 1
                && self.inner.config.runtime.auto_activate
                && control.state != RuntimeState::Running;
            (control.readers, should_start)
        };
        metrics::set_readers(readers);

        if should_start && !self.start() {
            tracing::debug!("Reader registered without starting collection");
        }
        readers
    }

    /// Unregister a reader. When the last one leaves a running collector,
    /// a stop is scheduled after the release debounce.
    ///
    /// Returns the new reader count (never below zero).
    pub fn release(&self) -> usize {
        let mut control = self.inner.control.lock();
        let previous = control.readers;
        control.readers = previous.saturating_sub(1);
        let readers = control.readers;

        if previous > 0
            && readers == 0
            && control.state == RuntimeState::Running
            && control.pending_stop.is_none()
            && let Some(worker) = control.worker.clone()
        {
            control.next_stop_id += 1;
            let id = control.next_stop_id;
            let debounce = self.inner.config.runtime.release_debounce();
            let controller = self.clone();
            let timer = worker.spawn(async move {
                tokio::time::sleep(debounce).await;
                // Stopping joins worker threads, so it cannot run on one.
                let spawned = std::thread::Builder::new()
                    .name("mdc-stop".to_string())
                    .spawn(move || {
                        controller.auto_stop(id);
                    });
                if let Err(e) = spawned {
                    tracing::error!(error = %e, "Failed to spawn stop thread");
                }
            });
            control.pending_stop = Some(PendingStop {
                id,
                timer: timer.abort_handle(),
            });
            tracing::debug!(debounce_ms = debounce.as_millis(), "Last reader left, stop scheduled");
        }
        drop(control);

        metrics::set_readers(readers);
        readers
    }

    fn auto_stop(&self, id: u64) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        {
            let mut control = self.inner.control.lock();
            if control.pending_stop.as_ref().is_none_or(|p| p.id != id) {
                return false;
            }
            control.pending_stop = None;
            if control.readers > 0 || control.state != RuntimeState::Running {
                return false;
            }
            control.state = RuntimeState::Stopping;
        }
        tracing::info!("No readers left, stopping collector");
        self.stop_locked(&mut lifecycle)
    }

    // -------------------------------------------------------------------------
    // Start / stop
    // -------------------------------------------------------------------------

    /// Start collecting.
    ///
    /// Returns `false` when already running, when another process holds
    /// the collector lock, or when startup fails or times out. A failed
    /// start leaves the controller `Stopped` with the lock released.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        {
            let mut control = self.inner.control.lock();
            if control.state != RuntimeState::Stopped {
                tracing::debug!(state = %control.state, "Start ignored");
                return false;
            }
            control.state = RuntimeState::Starting;
        }

        match self.launch() {
            Ok(active) => {
                let worker = active.worker.handle().clone();
                let orchestrator = Arc::clone(&active.orchestrator);
                *lifecycle = Some(active);
                {
                    let mut control = self.inner.control.lock();
                    control.state = RuntimeState::Running;
                    control.worker = Some(worker);
                    control.orchestrator = Some(orchestrator);
                }
                drop(lifecycle);

                metrics::set_runtime_running(true);
                self.install_signal_handler();
                true
            }
            Err(failure) => {
                self.inner.control.lock().state = RuntimeState::Stopped;
                match failure {
                    StartFailure::LockHeld => tracing::info!(
                        lock = %self.inner.config.lock_path().display(),
                        "Collector lock held elsewhere, running as reader only"
                    ),
                    other => tracing::error!(error = %other, "Collector start failed"),
                }
                false
            }
        }
    }

    fn launch(&self) -> Result<ActiveRuntime, StartFailure> {
        let runtime = &self.inner.config.runtime;
        let lock = LockToken::try_acquire(&self.inner.config.lock_path())?
            .ok_or(StartFailure::LockHeld)?;
        let worker = WorkerContext::ensure(runtime.worker_threads, runtime.shutdown_timeout())?;

        let orchestrator = Arc::new(IngestionOrchestrator::new(
            IngestionPlan::from_config(&self.inner.config),
            Arc::clone(&self.inner.factory),
            Arc::clone(&self.inner.store),
            ResubscribeConfig::from_retry_config(&self.inner.config.retry),
            Arc::clone(&self.inner.observers),
        ));

        let starting = Arc::clone(&orchestrator);
        let outcome = worker
            .submit(async move { starting.start().await }, runtime.startup_timeout())
            .map_err(StartFailure::from)
            .and_then(|started| started.map_err(StartFailure::from));

        match outcome {
            Ok(streams) => {
                tracing::info!(
                    streams,
                    instance = %lock.instance_id(),
                    lock = %lock.path().display(),
                    "Collector started"
                );
                Ok(ActiveRuntime {
                    lock,
                    worker,
                    orchestrator,
                })
            }
            Err(failure) => {
                let cleanup = Arc::clone(&orchestrator);
                let timeout = runtime.shutdown_timeout();
                // Cancels a start that is still connecting after the timeout.
                match worker.submit(
                    async move { cleanup.stop(timeout).await },
                    timeout + STOP_OVERHEAD + STOP_GRACE,
                ) {
                    Ok(report) => tracing::debug!(?report, "Rolled back streams"),
                    Err(e) => tracing::warn!(error = %e, "Rollback shutdown did not complete"),
                }
                worker.halt();
                lock.release();
                Err(failure)
            }
        }
    }

    /// Stop collecting.
    ///
    /// Returns `false` when not running. Shutdown problems are logged;
    /// the controller always ends `Stopped` with the lock released.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        {
            let mut control = self.inner.control.lock();
            if control.state != RuntimeState::Running {
                return false;
            }
            control.cancel_pending_stop();
            control.state = RuntimeState::Stopping;
        }
        self.stop_locked(&mut lifecycle)
    }

    fn stop_locked(&self, lifecycle: &mut Option<ActiveRuntime>) -> bool {
        let Some(active) = lifecycle.take() else {
            self.inner.control.lock().state = RuntimeState::Stopped;
            return false;
        };

        let timeout = self.inner.config.runtime.shutdown_timeout();
        let orchestrator = Arc::clone(&active.orchestrator);
        match active
            .worker
            .submit(
                async move { orchestrator.stop(timeout).await },
                timeout + STOP_OVERHEAD + STOP_GRACE,
            )
        {
            Ok(report) => tracing::debug!(?report, "Streams stopped"),
            Err(e) => tracing::warn!(error = %e, "Stream shutdown did not complete"),
        }
        self.inner.store.close_all();
        active.lock.release();
        active.worker.halt();

        {
            let mut control = self.inner.control.lock();
            control.state = RuntimeState::Stopped;
            control.worker = None;
            control.orchestrator = None;
            control.cancel_pending_stop();
        }

        metrics::set_runtime_running(false);
        tracing::info!("Collector stopped");
        true
    }

    fn install_signal_handler(&self) {
        if !self.inner.config.runtime.handle_signals
            || self.inner.signals_installed.swap(true, Ordering::SeqCst)
        {
            return;
        }
        if let Err(e) = signals::install(self.clone()) {
            self.inner.signals_installed.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, "Signal handler not installed");
        }
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Whether this process is collecting.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running
    }

    /// Registered readers.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.inner.control.lock().readers
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.inner.control.lock().state
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        let control = self.inner.control.lock();
        RuntimeStatus {
            state: control.state,
            readers: control.readers,
            active_streams: control
                .orchestrator
                .as_ref()
                .map_or(0, |o| o.active_streams()),
            stop_pending: control.pending_stop.is_some(),
            lock_path: self.inner.config.lock_path().display().to_string(),
        }
    }

    /// Shard store, for reads.
    #[must_use]
    pub fn store(&self) -> Arc<ShardedStore> {
        Arc::clone(&self.inner.store)
    }

    /// Configuration this controller runs with.
    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    /// Lock file path.
    #[must_use]
    pub fn lock_path(&self) -> std::path::PathBuf {
        self.inner.config.lock_path()
    }

    /// Register a callback for persisted records of `kind`. Survives
    /// restarts.
    pub fn register_observer<F>(&self, kind: DataKind, callback: F)
    where
        F: Fn(&Record) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.inner.observers.register(kind, callback);
    }

    /// Register a reader for the lifetime of the returned lease.
    #[must_use]
    pub fn lease(&self) -> RuntimeLease {
        RuntimeLease::new(self.clone())
    }

    /// Guard that stops collection when dropped, for the end of `main`.
    #[must_use]
    pub fn exit_guard(&self) -> ExitGuard {
        ExitGuard::new(self.clone())
    }
}

impl std::fmt::Debug for RuntimeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.inner.control.lock();
        f.debug_struct("RuntimeController")
            .field("state", &control.state)
            .field("readers", &control.readers)
            .field("data_dir", &self.inner.config.runtime.data_dir)
            .finish_non_exhaustive()
    }
}

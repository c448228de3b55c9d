//! Ingestion Orchestrator
//!
//! Opens one source per [`SourceGroup`] and spawns one [`StreamTask`]
//! per stream. Tasks share a cancellation token; stopping cancels them,
//! waits up to a deadline, aborts whatever is left and closes every
//! source.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::plan::IngestionPlan;
use super::retry::ResubscribeConfig;
use super::stream::{StreamExit, StreamSinks, StreamTask};
use crate::application::ports::{MarketDataSource, SourceFactory};
use crate::application::services::{ObserverError, ObserverRegistry};
use crate::domain::market::DataKind;
use crate::domain::record::Record;
use crate::infrastructure::metrics;
use crate::infrastructure::persistence::ShardedStore;

/// How long aborted tasks get to unwind, and the least time a source
/// gets to close.
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on how far [`IngestionOrchestrator::stop`] can overrun
/// its timeout: one grace period to drain aborted tasks, one to close
/// sources once the deadline has passed.
pub const STOP_OVERHEAD: Duration = ABORT_GRACE.saturating_mul(2);

// =============================================================================
// Errors and Reports
// =============================================================================

/// Orchestrator start errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// `start` called twice without `stop`.
    #[error("Orchestrator is already running")]
    AlreadyRunning,

    /// `stop` ran while the start was still connecting sources.
    #[error("Start was cancelled by stop")]
    Cancelled,

    /// The plan had streams but none could be launched.
    #[error("No stream could be started ({failed} source(s) failed to connect)")]
    NoStreamsStarted {
        /// Sources that failed to connect.
        failed: usize,
    },
}

/// Outcome of [`IngestionOrchestrator::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Tasks that finished before the deadline.
    pub completed: usize,
    /// Tasks aborted at the deadline.
    pub aborted: usize,
    /// Sources whose `close` failed or timed out.
    pub close_failures: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

struct ActiveSet {
    cancel: CancellationToken,
    tasks: JoinSet<StreamExit>,
    sources: Vec<Arc<dyn MarketDataSource>>,
}

/// Supervises every stream of an [`IngestionPlan`].
pub struct IngestionOrchestrator {
    plan: IngestionPlan,
    factory: Arc<dyn SourceFactory>,
    sinks: StreamSinks,
    retry: ResubscribeConfig,
    active: Mutex<Option<ActiveSet>>,
    starting: Mutex<Option<CancellationToken>>,
    running_tasks: Arc<AtomicUsize>,
}

impl IngestionOrchestrator {
    /// Create an orchestrator. Nothing runs until [`Self::start`].
    #[must_use]
    pub fn new(
        plan: IngestionPlan,
        factory: Arc<dyn SourceFactory>,
        store: Arc<ShardedStore>,
        retry: ResubscribeConfig,
        observers: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            plan,
            factory,
            sinks: StreamSinks { store, observers },
            retry,
            active: Mutex::new(None),
            starting: Mutex::new(None),
            running_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connect every source group and spawn its streams.
    ///
    /// A group whose source fails to connect is skipped. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` when started twice, `NoStreamsStarted`
    /// when the plan has streams but no source connected, and `Cancelled`
    /// when [`Self::stop`] ran before the start finished. A cancelled
    /// start leaves no stream running and closes what it connected.
    pub async fn start(&self) -> Result<usize, OrchestratorError> {
        let cancel = CancellationToken::new();
        {
            let active = self.active.lock();
            let mut starting = self.starting.lock();
            if active.is_some() || starting.is_some() {
                return Err(OrchestratorError::AlreadyRunning);
            }
            *starting = Some(cancel.clone());
        }
        let _starting = StartingGuard(&self.starting);

        let mut tasks = JoinSet::new();
        let mut sources = Vec::new();
        let mut failed = 0;

        for group in &self.plan.groups {
            if cancel.is_cancelled() {
                break;
            }
            let source = match self.factory.connect(&group.spec) {
                Ok(source) => source,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        venue = %group.spec.venue,
                        scope = ?group.spec.scope,
                        error = %e,
                        "Source connection failed, skipping its streams"
                    );
                    continue;
                }
            };
            sources.push(Arc::clone(&source));
            if cancel.is_cancelled() {
                break;
            }

            for spec in &group.streams {
                let task = StreamTask::new(
                    spec.clone(),
                    Arc::clone(&source),
                    self.sinks.clone(),
                    self.retry.clone(),
                    cancel.child_token(),
                );
                let guard = RunningGuard::enter(&self.running_tasks);
                tasks.spawn(async move {
                    let _guard = guard;
                    task.run().await
                });
            }
        }

        let launched = tasks.len();
        if launched == 0 && !self.plan.is_empty() && !cancel.is_cancelled() {
            close_sources(&sources, ABORT_GRACE).await;
            return Err(OrchestratorError::NoStreamsStarted { failed });
        }

        {
            let mut active = self.active.lock();
            // `stop` cancels under this lock, so a start it missed sees it here.
            if !cancel.is_cancelled() {
                tracing::info!(
                    streams = launched,
                    sources = sources.len(),
                    failed_sources = failed,
                    "Ingestion started"
                );
                *active = Some(ActiveSet {
                    cancel,
                    tasks,
                    sources,
                });
                return Ok(launched);
            }
        }

        tracing::info!(streams = launched, "Start cancelled, discarding its streams");
        tasks.abort_all();
        // Detached so the cleanup outlives a caller that gave up on this start.
        tokio::spawn(async move {
            let drain = async { while tasks.join_next().await.is_some() {} };
            let _ = tokio::time::timeout(ABORT_GRACE, drain).await;
            close_sources(&sources, ABORT_GRACE).await;
        });
        Err(OrchestratorError::Cancelled)
    }

    /// Cancel every stream, wait up to `timeout`, abort stragglers and
    /// close every source. A start still connecting is cancelled instead.
    ///
    /// Joins and closes share one deadline. Closing always gets at least
    /// a short grace period, so the call returns within `timeout` plus
    /// [`STOP_OVERHEAD`].
    pub async fn stop(&self, timeout: Duration) -> StopReport {
        let taken = {
            let mut active = self.active.lock();
            let taken = active.take();
            if taken.is_none()
                && let Some(pending) = self.starting.lock().as_ref()
            {
                pending.cancel();
            }
            taken
        };
        let Some(mut active) = taken else {
            return StopReport::default();
        };
        let mut report = StopReport::default();

        active.cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, active.tasks.join_next()).await {
                Ok(Some(Ok(_))) => report.completed += 1,
                Ok(Some(Err(e))) => {
                    report.completed += 1;
                    if e.is_panic() {
                        tracing::error!(error = %e, "Stream task panicked");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = active.tasks.len();
                    tracing::warn!(
                        aborted = report.aborted,
                        timeout_ms = timeout.as_millis(),
                        "Streams did not stop in time, aborting"
                    );
                    active.tasks.abort_all();
                    let drain = async { while active.tasks.join_next().await.is_some() {} };
                    let _ = tokio::time::timeout(ABORT_GRACE, drain).await;
                    break;
                }
            }
        }

        let remaining = deadline
            .saturating_duration_since(tokio::time::Instant::now())
            .max(ABORT_GRACE);
        report.close_failures = close_sources(&active.sources, remaining).await;

        tracing::info!(
            completed = report.completed,
            aborted = report.aborted,
            close_failures = report.close_failures,
            "Ingestion stopped"
        );
        report
    }

    /// Register a callback for persisted records of `kind`.
    pub fn register_observer<F>(&self, kind: DataKind, callback: F)
    where
        F: Fn(&Record) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.sinks.observers.register(kind, callback);
    }

    /// Stream tasks currently running.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.running_tasks.load(Ordering::SeqCst)
    }

    /// Whether `start` succeeded and `stop` has not run since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// The plan this orchestrator runs.
    #[must_use]
    pub const fn plan(&self) -> &IngestionPlan {
        &self.plan
    }
}

impl std::fmt::Debug for IngestionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("streams", &self.plan.stream_count())
            .field("running", &self.is_running())
            .field("active_streams", &self.active_streams())
            .finish_non_exhaustive()
    }
}

/// Close every source concurrently, each bounded by `timeout`. Returns
/// how many failed or timed out.
async fn close_sources(sources: &[Arc<dyn MarketDataSource>], timeout: Duration) -> usize {
    let closes = sources
        .iter()
        .map(|source| tokio::time::timeout(timeout, source.close()));
    let mut failures = 0;
    for outcome in join_all(closes).await {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                tracing::warn!(error = %e, "Source close failed");
            }
            Err(_) => {
                failures += 1;
                tracing::warn!(timeout_ms = timeout.as_millis(), "Source close timed out");
            }
        }
    }
    failures
}

/// Clears the pending-start slot however `start` exits.
struct StartingGuard<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

/// Counts a spawned task until it finishes or is aborted.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_streams(now);
        Self(Arc::clone(counter))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_streams(now);
    }
}

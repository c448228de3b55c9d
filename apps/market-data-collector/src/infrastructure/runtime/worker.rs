//! Worker Context
//!
//! Where ingestion tasks run. Inside a multi-threaded tokio runtime the
//! caller's runtime is borrowed; anywhere else the collector starts its
//! own runtime on a dedicated thread. Synchronous callers hand futures
//! over with [`WorkerContext::submit`] and wait on a result channel with a
//! deadline.

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tokio::sync::oneshot;

/// Name of the thread driving an owned runtime.
const RUNTIME_THREAD: &str = "mdc-runtime";
/// Name of the owned runtime's worker threads.
const WORKER_THREAD: &str = "mdc-worker";

/// Worker bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The job did not finish in time.
    #[error("Worker job timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime shut down before the job finished.
    #[error("Worker runtime is gone")]
    Gone,

    /// The runtime thread could not be started.
    #[error("Failed to start worker runtime: {0}")]
    Spawn(#[source] std::io::Error),
}

struct OwnedRuntime {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

/// Handle to the runtime ingestion runs on.
pub struct WorkerContext {
    handle: Handle,
    owned: Option<OwnedRuntime>,
}

impl WorkerContext {
    /// Borrow the caller's multi-threaded runtime, or start an owned one.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Spawn` when an owned runtime cannot start.
    pub fn ensure(worker_threads: usize, shutdown_timeout: Duration) -> Result<Self, WorkerError> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tracing::debug!("Borrowing caller runtime");
                Ok(Self {
                    handle,
                    owned: None,
                })
            }
            _ => Self::spawn_owned(worker_threads, shutdown_timeout),
        }
    }

    /// Start a dedicated runtime thread.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Spawn` when the thread or runtime cannot be
    /// created.
    pub fn spawn_owned(worker_threads: usize, shutdown_timeout: Duration) -> Result<Self, WorkerError> {
        let (handle_tx, handle_rx) = mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(RUNTIME_THREAD.to_string())
            .spawn(move || {
                let runtime = match Builder::new_multi_thread()
                    .worker_threads(worker_threads.max(1))
                    .thread_name(WORKER_THREAD)
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                runtime.shutdown_timeout(shutdown_timeout);
                tracing::debug!("Owned runtime stopped");
            })
            .map_err(WorkerError::Spawn)?;

        let handle = match handle_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(WorkerError::Spawn(e));
            }
            Err(_) => return Err(WorkerError::Gone),
        };

        tracing::debug!(worker_threads, "Owned runtime started");
        Ok(Self {
            handle,
            owned: Some(OwnedRuntime {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
        })
    }

    /// Runtime handle.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether the runtime belongs to the collector.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Run `future` on the worker and block until it completes or
    /// `timeout` elapses. A timed-out job is aborted.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` on deadline and `Gone` when the runtime is shut
    /// down.
    pub fn submit<F, T>(&self, future: F, timeout: Duration) -> Result<T, WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job = self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        let wait = || rx.recv_timeout(timeout);
        let result = if on_multi_thread_runtime() {
            tokio::task::block_in_place(wait)
        } else {
            wait()
        };

        match result {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                job.abort();
                Err(WorkerError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Gone),
        }
    }

    /// Stop an owned runtime and wait for its thread. A borrowed runtime
    /// is left alone.
    pub fn halt(mut self) {
        let Some(mut owned) = self.owned.take() else {
            return;
        };
        if let Some(shutdown) = owned.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(thread) = owned.thread.take() else {
            return;
        };
        // Joining from one of our own workers would deadlock.
        if std::thread::current().name() == Some(WORKER_THREAD) {
            tracing::debug!("Halt requested from a worker thread, detaching");
            return;
        }
        if thread.join().is_err() {
            tracing::error!("Owned runtime thread panicked");
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        if let Some(shutdown) = self.owned.as_mut().and_then(|o| o.shutdown.take()) {
            let _ = shutdown.send(());
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("owned", &self.is_owned())
            .finish_non_exhaustive()
    }
}

fn on_multi_thread_runtime() -> bool {
    Handle::try_current().is_ok_and(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_runtime_outside_tokio() {
        let worker = WorkerContext::ensure(1, Duration::from_secs(1)).unwrap();
        assert!(worker.is_owned());

        let value = worker.submit(async { 40 + 2 }, Duration::from_secs(1)).unwrap();
        assert_eq!(value, 42);
        worker.halt();
    }

    #[test]
    fn submit_times_out() {
        let worker = WorkerContext::spawn_owned(1, Duration::from_millis(100)).unwrap();
        let result = worker.submit(
            async { tokio::time::sleep(Duration::from_secs(5)).await },
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(WorkerError::Timeout(_))));
        worker.halt();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn borrows_multi_thread_runtime() {
        let worker = WorkerContext::ensure(1, Duration::from_secs(1)).unwrap();
        assert!(!worker.is_owned());

        let value = worker.submit(async { "ok" }, Duration::from_secs(1)).unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn current_thread_runtime_gets_owned_worker() {
        let worker = WorkerContext::ensure(1, Duration::from_secs(1)).unwrap();
        assert!(worker.is_owned());
        let value = worker.submit(async { 7 }, Duration::from_secs(1)).unwrap();
        assert_eq!(value, 7);
        worker.halt();
    }

    #[test]
    fn halted_runtime_rejects_work() {
        let worker = WorkerContext::spawn_owned(1, Duration::from_millis(100)).unwrap();
        let handle = worker.handle().clone();
        worker.halt();
        let (tx, rx) = mpsc::sync_channel::<u8>(1);
        let _ = handle.spawn(async move {
            let _ = tx.send(1);
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}

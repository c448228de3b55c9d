//! Termination Handling
//!
//! SIGINT and SIGTERM (Ctrl-C elsewhere) stop a running collector before
//! the process exits with `128 + signal`. The handler lives on its own
//! thread with a single-threaded runtime, so it works whether or not the
//! host application runs tokio.

use std::sync::mpsc;

use tokio::runtime::Builder;
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

use super::controller::RuntimeController;

const SIGINT: i32 = 2;
#[cfg(unix)]
const SIGTERM: i32 = 15;

/// Start the signal thread for `controller`.
///
/// Returns once the handlers are registered, so a signal sent right
/// after a successful start never hits the default action.
pub(super) fn install(controller: RuntimeController) -> std::io::Result<()> {
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);

    std::thread::Builder::new()
        .name("mdc-signals".to_string())
        .spawn(move || {
            let registered = Builder::new_current_thread()
                .enable_all()
                .build()
                .and_then(|runtime| {
                    let listener = {
                        let _context = runtime.enter();
                        TerminationListener::register()?
                    };
                    Ok((runtime, listener))
                });
            let (runtime, listener) = match registered {
                Ok(parts) => {
                    let _ = ready_tx.send(Ok(()));
                    parts
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let signo = runtime.block_on(listener.recv());
            tracing::info!(signal = signo, "Termination signal received, stopping collector");
            controller.stop();
            std::process::exit(128 + signo);
        })?;

    ready_rx
        .recv()
        .unwrap_or_else(|_| Err(std::io::Error::other("signal thread exited early")))
}

/// Registered SIGINT and SIGTERM streams.
#[cfg(unix)]
struct TerminationListener {
    interrupt: Signal,
    terminate: Signal,
}

#[cfg(unix)]
impl TerminationListener {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for either signal and return its number.
    async fn recv(mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => SIGINT,
            _ = self.terminate.recv() => SIGTERM,
        }
    }
}

/// Ctrl-C only.
#[cfg(not(unix))]
struct TerminationListener;

#[cfg(not(unix))]
impl TerminationListener {
    #[allow(clippy::unnecessary_wraps)]
    const fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> i32 {
        match tokio::signal::ctrl_c().await {
            Ok(()) => SIGINT,
            Err(e) => {
                tracing::warn!(error = %e, "Ctrl-C handler not installed");
                std::future::pending().await
            }
        }
    }
}

/// Stops the collector when dropped. Hold one in `main` so a normal
/// return also shuts ingestion down.
#[derive(Debug)]
#[must_use = "the collector is stopped when the guard is dropped"]
pub struct ExitGuard {
    controller: RuntimeController,
}

impl ExitGuard {
    /// Guard `controller`.
    pub const fn new(controller: RuntimeController) -> Self {
        Self { controller }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.controller.is_running() {
            tracing::info!("Process exiting, stopping collector");
            self.controller.stop();
        }
    }
}

//! Runtime - process lifecycle of the collector.
//!
//! - `controller`: reader counting, start/stop, debounced shutdown
//! - `lock`: cross-process collector lock
//! - `worker`: runtime that ingestion runs on, and the sync bridge into it
//! - `signals`: termination handling and the exit guard
//! - `lease`: scoped reader registration

mod controller;
mod lease;
mod lock;
mod signals;
mod worker;

pub use controller::{RuntimeController, RuntimeState, RuntimeStatus};
pub use lease::RuntimeLease;
pub use lock::{LockError, LockToken, read_holder};
pub use signals::ExitGuard;
pub use worker::{WorkerContext, WorkerError};

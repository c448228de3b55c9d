//! Reader lease: registers a reader for as long as it lives.

use std::sync::Arc;

use super::controller::RuntimeController;
use crate::infrastructure::persistence::ShardedStore;

/// Scoped reader registration. Dropping it (including during unwinding)
/// releases the reader.
#[derive(Debug)]
#[must_use = "the reader is released when the lease is dropped"]
pub struct RuntimeLease {
    controller: RuntimeController,
}

impl RuntimeLease {
    /// Register a reader on `controller`.
    pub fn new(controller: RuntimeController) -> Self {
        controller.acquire();
        Self { controller }
    }

    /// Store to read from while the lease is held.
    #[must_use]
    pub fn store(&self) -> Arc<ShardedStore> {
        self.controller.store()
    }

    /// The controller this lease is registered with.
    #[must_use]
    pub const fn controller(&self) -> &RuntimeController {
        &self.controller
    }
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        self.controller.release();
    }
}

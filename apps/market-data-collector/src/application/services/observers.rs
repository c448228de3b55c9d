//! Observer Registry
//!
//! Callbacks registered per data kind. Every persisted record is handed
//! to the callbacks of its kind, in registration order. A failing or
//! panicking callback is logged and skipped; it never reaches the stream
//! that produced the record.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::market::DataKind;
use crate::domain::record::Record;

/// Error type returned by observers.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with each persisted record.
pub type Observer = Arc<dyn Fn(&Record) -> Result<(), ObserverError> + Send + Sync>;

/// Per-kind observer lists.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<HashMap<DataKind, Vec<Observer>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `kind`.
    pub fn register<F>(&self, kind: DataKind, callback: F)
    where
        F: Fn(&Record) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.observers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Number of callbacks registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: DataKind) -> usize {
        self.observers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every callback registered for the record's kind.
    ///
    /// Returns the number of callbacks that failed.
    pub fn notify(&self, record: &Record) -> usize {
        // Snapshot so callbacks may register further observers.
        let callbacks: Vec<Observer> = match self.observers.read().get(&record.kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut failures = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(
                        kind = %record.kind,
                        venue = %record.venue,
                        symbol = %record.symbol,
                        error = %e,
                        "Observer failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(
                        kind = %record.kind,
                        venue = %record.venue,
                        symbol = %record.symbol,
                        "Observer panicked"
                    );
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<DataKind, usize> = self
            .observers
            .read()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &counts)
            .finish()
    }
}

//! Application Services
//!
//! - `ObserverRegistry`: per-kind callbacks invoked after a record is
//!   persisted

mod observers;

pub use observers::{Observer, ObserverError, ObserverRegistry};

//! Ingestion - supervised streams from venue sources into the store.
//!
//! - `plan`: configuration expanded into source groups and stream specs
//! - `stream`: one supervised subscribe/poll loop per stream
//! - `retry`: resubscription budget and delays
//! - `orchestrator`: launches, supervises and stops every stream

mod orchestrator;
mod plan;
mod retry;
mod stream;

pub use orchestrator::{IngestionOrchestrator, OrchestratorError, STOP_OVERHEAD, StopReport};
pub use plan::{IngestionPlan, SourceGroup, StreamSpec};
pub use retry::{ResubscribeConfig, ResubscribePolicy};
pub use stream::{StreamExit, StreamSinks, StreamTask, normalize};

//! Scan pipeline: fetch, dual-model classification and idea extraction,
//! driven through a durable job queue.

pub mod classify;
pub mod consensus;
pub mod deps;
pub mod dispatch;
pub mod dry_run;
pub mod extract;
pub mod fetch;
pub mod finalize;
pub mod models;
pub mod orchestrator;
pub mod reaper;
pub mod retry;
pub mod sources;
pub mod state_machine;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod worker;

pub use deps::PipelineDeps;
pub use orchestrator::ScanOrchestrator;
pub use worker::{Worker, WorkerPool};

//! Persistence for the scan pipeline: the scan store and the job queue.
//!
//! Both seams have a Postgres implementation for production and an in-memory
//! one for tests and local dry runs.

pub mod memory;
pub mod pg;
pub mod queue;
pub mod store;

pub use memory::{MemoryJobQueue, MemoryScanStore};
pub use pg::{PgJobQueue, PgScanStore};
pub use queue::{FailOutcome, JobQueue, QueueSettings, ReservedJob};
pub use store::{
    reply_chunks, ExtractionLock, NewScan, PageCommit, ReplyChunk, ScanCreation, ScanStore,
};

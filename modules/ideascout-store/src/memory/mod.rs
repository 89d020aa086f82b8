mod job_queue;
mod scan_store;

pub use job_queue::MemoryJobQueue;
pub use scan_store::MemoryScanStore;

mod job_queue;
mod rows;
mod scan_store;

pub use job_queue::PgJobQueue;
pub use scan_store::PgScanStore;

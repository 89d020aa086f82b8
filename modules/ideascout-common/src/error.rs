use thiserror::Error;
use uuid::Uuid;

use crate::types::ScanStatus;

#[derive(Error, Debug)]
pub enum IdeaScoutError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown verdict: {0}")]
    UnknownVerdict(String),

    #[error("Unknown scan status: {0}")]
    UnknownStatus(String),

    #[error("Content source error: {0}")]
    Source(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Errors surfaced to callers of the scan operations (UI, CLI).
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Topic not found: {0}")]
    TopicNotFound(Uuid),

    #[error("Scan not found: {0}")]
    ScanNotFound(Uuid),

    #[error("Scan {scan_id} is {status} and cannot be cancelled")]
    NotCancellable { scan_id: Uuid, status: ScanStatus },

    #[error("Scan {scan_id} is {status}; only failed scans can be retried")]
    NotRetryable { scan_id: Uuid, status: ScanStatus },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

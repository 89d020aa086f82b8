use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdeaScoutError;

/// Worker pools are sized per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Fetch,
    Classify,
    Extract,
}

impl Queue {
    pub const ALL: [Queue; 3] = [Queue::Fetch, Queue::Classify, Queue::Extract];

    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Fetch => "fetch",
            Queue::Classify => "classify",
            Queue::Extract => "extract",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = IdeaScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Queue::Fetch),
            "classify" => Ok(Queue::Classify),
            "extract" => Ok(Queue::Extract),
            other => Err(IdeaScoutError::Config(format!("unknown queue: {other}"))),
        }
    }
}

/// A unit of pipeline work. Every job belongs to exactly one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    FetchPage { scan_id: Uuid, page: i32 },
    /// Chunk `chunk` of page `page`; the pair names it in the scan store.
    FetchReplies {
        scan_id: Uuid,
        page: i32,
        chunk: i32,
        item_ids: Vec<Uuid>,
    },
    CheckFetchComplete { scan_id: Uuid, poll: u32 },
    BeginClassify { scan_id: Uuid },
    ClassifyChunk { scan_id: Uuid, item_ids: Vec<Uuid> },
    FinalizeClassify { scan_id: Uuid },
    BeginExtract { scan_id: Uuid },
    ExtractChunk { scan_id: Uuid, item_ids: Vec<Uuid> },
    FinalizeExtract { scan_id: Uuid },
}

impl Job {
    pub fn scan_id(&self) -> Uuid {
        match self {
            Job::FetchPage { scan_id, .. }
            | Job::FetchReplies { scan_id, .. }
            | Job::CheckFetchComplete { scan_id, .. }
            | Job::BeginClassify { scan_id }
            | Job::ClassifyChunk { scan_id, .. }
            | Job::FinalizeClassify { scan_id }
            | Job::BeginExtract { scan_id }
            | Job::ExtractChunk { scan_id, .. }
            | Job::FinalizeExtract { scan_id } => *scan_id,
        }
    }

    pub fn queue(&self) -> Queue {
        match self {
            Job::FetchPage { .. } | Job::FetchReplies { .. } | Job::CheckFetchComplete { .. } => {
                Queue::Fetch
            }
            Job::BeginClassify { .. }
            | Job::ClassifyChunk { .. }
            | Job::FinalizeClassify { .. } => Queue::Classify,
            Job::BeginExtract { .. } | Job::ExtractChunk { .. } | Job::FinalizeExtract { .. } => {
                Queue::Extract
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::FetchPage { .. } => "fetch_page",
            Job::FetchReplies { .. } => "fetch_replies",
            Job::CheckFetchComplete { .. } => "check_fetch_complete",
            Job::BeginClassify { .. } => "begin_classify",
            Job::ClassifyChunk { .. } => "classify_chunk",
            Job::FinalizeClassify { .. } => "finalize_classify",
            Job::BeginExtract { .. } => "begin_extract",
            Job::ExtractChunk { .. } => "extract_chunk",
            Job::FinalizeExtract { .. } => "finalize_extract",
        }
    }

    /// Jobs the scan cannot advance without. Losing one of these for good
    /// leaves the scan stuck, so burying one fails the scan.
    pub fn is_scan_critical(&self) -> bool {
        !matches!(
            self,
            Job::FetchReplies { .. } | Job::ClassifyChunk { .. } | Job::ExtractChunk { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged() {
        let scan_id = Uuid::new_v4();
        let json = serde_json::to_value(Job::FetchPage { scan_id, page: 2 }).unwrap();
        assert_eq!(json["type"], "fetch_page");
        assert_eq!(json["page"], 2);
    }

    #[test]
    fn chunks_are_not_scan_critical() {
        let scan_id = Uuid::new_v4();
        assert!(!Job::ClassifyChunk { scan_id, item_ids: vec![] }.is_scan_critical());
        assert!(Job::FinalizeClassify { scan_id }.is_scan_critical());
        assert_eq!(Job::CheckFetchComplete { scan_id, poll: 0 }.queue(), Queue::Fetch);
        assert_eq!(Job::FinalizeExtract { scan_id }.queue(), Queue::Extract);
    }
}

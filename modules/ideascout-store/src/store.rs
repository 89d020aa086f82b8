//! The persisted state every pipeline job coordinates through.
//!
//! Jobs share no process memory. Each guarded operation here re-checks the
//! scan's persisted status inside the same statement or transaction that
//! mutates it, so duplicate and out-of-order delivery turn into no-ops.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ideascout_common::{
    Classification, DateWindow, FetchedItem, Idea, Item, Scan, ScanStatus, Topic,
};

/// Inputs for [`ScanStore::create_scan_if_idle`].
#[derive(Debug, Clone)]
pub struct NewScan {
    pub topic_id: Uuid,
    /// Explicit window; when absent the default depends on the scan type.
    pub window: Option<DateWindow>,
    pub initial_window_days: i64,
    pub rescan_window_days: i64,
}

#[derive(Debug, Clone)]
pub enum ScanCreation {
    Created(Scan),
    /// Another scan for the topic is still running; it is returned unchanged.
    Existing(Scan),
    TopicNotFound,
}

/// One `FetchReplies` unit of a committed page. `(scan, page, chunk)`
/// identifies it, so its completion counts once however often it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChunk {
    pub page: i32,
    pub chunk: i32,
    pub item_ids: Vec<Uuid>,
}

/// Result of committing one fetched page.
#[derive(Debug, Clone)]
pub struct PageCommit {
    /// Ids of the upserted items, in fetch order.
    pub item_ids: Vec<Uuid>,
    pub reply_chunks: Vec<ReplyChunk>,
}

/// Split a page's item ids into reply chunks of at most `size`.
pub fn reply_chunks(page: i32, item_ids: &[Uuid], size: usize) -> Vec<ReplyChunk> {
    item_ids
        .chunks(size.max(1))
        .enumerate()
        .map(|(chunk, ids)| ReplyChunk {
            page,
            chunk: chunk as i32,
            item_ids: ids.to_vec(),
        })
        .collect()
}

/// Exclusive hold on one item for the duration of its extraction.
///
/// Dropping the lock without committing releases it and leaves the item
/// unmarked, so a later delivery extracts it again.
#[async_trait]
pub trait ExtractionLock: Send {
    fn item(&self) -> &Item;

    fn classification(&self) -> Option<&Classification>;

    /// Insert `ideas`, mark the item extracted and bump the scan counters, all
    /// under the held lock. Returns false (and writes nothing) when the scan
    /// has left the extracting stage.
    async fn commit(self: Box<Self>, scan_id: Uuid, ideas: &[Idea]) -> Result<bool>;

    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    // --- Topics ---

    async fn create_topic(&self, topic: &Topic) -> Result<()>;

    async fn get_topic(&self, topic_id: Uuid) -> Result<Option<Topic>>;

    // --- Scan lifecycle ---

    async fn get_scan(&self, scan_id: Uuid) -> Result<Option<Scan>>;

    /// Under a lock on the topic: return the topic's active scan if there is
    /// one, otherwise insert a new `pending` scan.
    async fn create_scan_if_idle(&self, request: NewScan) -> Result<ScanCreation>;

    /// Compare-and-set on the status. Returns false when the scan is missing
    /// or no longer in `from`. Entering a stage resets that stage's counters.
    async fn transition(&self, scan_id: Uuid, from: ScanStatus, to: ScanStatus) -> Result<bool>;

    /// Move any non-terminal scan to `failed` with a message.
    async fn fail_scan(&self, scan_id: Uuid, message: &str) -> Result<bool>;

    /// Non-terminal scans whose last update is older than `cutoff`.
    async fn stale_scans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Scan>>;

    // --- Fetch stage ---

    /// Commit page `page` of a fetching scan in one transaction: upsert the
    /// items, record their reply chunks (at most `reply_chunk_size` each),
    /// store the next checkpoint and add to `items_fetched` and
    /// `child_jobs_total`. Returns `None` when `pages_fetched != page`, i.e. a
    /// duplicate delivery.
    async fn commit_page(
        &self,
        scan_id: Uuid,
        page: i32,
        items: Vec<FetchedItem>,
        next_checkpoint: Option<String>,
        reply_chunk_size: usize,
    ) -> Result<Option<PageCommit>>;

    /// Reply chunks of a committed page that have not finished yet.
    async fn pending_reply_chunks(&self, scan_id: Uuid, page: i32) -> Result<Vec<ReplyChunk>>;

    async fn store_replies(&self, item_id: Uuid, replies: Vec<String>) -> Result<()>;

    /// Mark one reply chunk finished and bump `child_jobs_done`. Returns false
    /// (and counts nothing) when the chunk was already marked or is unknown.
    async fn record_child_job_done(&self, scan_id: Uuid, page: i32, chunk: i32) -> Result<bool>;

    // --- Items ---

    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>>;

    async fn scan_items(&self, scan_id: Uuid) -> Result<Vec<Item>>;

    // --- Classify stage ---

    async fn get_classification(&self, item_id: Uuid) -> Result<Option<Classification>>;

    /// Items of the scan without a terminal classification.
    async fn unclassified_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>>;

    /// Prepare a fresh `pending` record, deleting a non-terminal leftover of a
    /// crashed attempt. Returns false when the item is already terminal.
    async fn begin_classification(&self, item_id: Uuid, scan_id: Uuid) -> Result<bool>;

    /// In one transaction: re-check the record is not terminal, upsert it and
    /// increment `items_classified`. Returns false when another delivery got
    /// there first or the scan has left the classifying stage.
    async fn complete_classification(&self, scan_id: Uuid, record: &Classification) -> Result<bool>;

    /// Write a terminal discard for every item of the scan still lacking one.
    /// Returns the number of records written.
    async fn gap_fill_classifications(&self, scan_id: Uuid, reason: &str) -> Result<u64>;

    /// Overwrite `items_classified` with the count of terminal records.
    async fn reconcile_classified(&self, scan_id: Uuid) -> Result<i64>;

    // --- Extract stage ---

    /// Keep and borderline items of the scan not yet extracted.
    async fn extractable_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>>;

    /// Take the item's row lock. Returns `None` when the item is gone or was
    /// already extracted by someone else.
    async fn lock_item_for_extraction(&self, item_id: Uuid) -> Result<Option<Box<dyn ExtractionLock>>>;

    /// Overwrite `items_extracted` and `ideas_found` from persisted rows.
    async fn reconcile_extracted(&self, scan_id: Uuid) -> Result<(i64, i64)>;

    async fn ideas_for_item(&self, item_id: Uuid) -> Result<Vec<Idea>>;

    async fn ideas_for_scan(&self, scan_id: Uuid) -> Result<Vec<Idea>>;
}

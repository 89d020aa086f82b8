use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use ideascout_common::{
    Classification, DateWindow, FetchedItem, Idea, Item, Scan, ScanCounters, ScanStatus, ScanType,
    Topic,
};

use crate::store::{
    reply_chunks, ExtractionLock, NewScan, PageCommit, ReplyChunk, ScanCreation, ScanStore,
};

struct ChunkState {
    scan_id: Uuid,
    chunk: ReplyChunk,
    done: bool,
}

#[derive(Default)]
struct State {
    topics: HashMap<Uuid, Topic>,
    scans: HashMap<Uuid, Scan>,
    items: HashMap<Uuid, Item>,
    /// Insertion order, so listings are stable.
    item_order: Vec<Uuid>,
    classifications: HashMap<Uuid, Classification>,
    ideas: Vec<Idea>,
    reply_chunks: Vec<ChunkState>,
}

impl State {
    fn scan_item_ids(&self, scan_id: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.item_order
            .iter()
            .copied()
            .filter(move |id| self.items.get(id).is_some_and(|i| i.scan_id == scan_id))
    }

    fn is_classified(&self, item_id: Uuid) -> bool {
        self.classifications
            .get(&item_id)
            .is_some_and(Classification::is_terminal)
    }

    fn upsert_item(&mut self, topic_id: Uuid, scan_id: Uuid, fetched: FetchedItem) -> Uuid {
        let existing = self
            .items
            .values_mut()
            .find(|i| i.topic_id == topic_id && i.source_id == fetched.source_id);

        match existing {
            Some(item) => {
                item.scan_id = scan_id;
                item.title = fetched.title;
                item.body = fetched.body;
                item.upvotes = fetched.upvotes;
                item.num_comments = fetched.num_comments;
                item.updated_at = Utc::now();
                item.id
            }
            None => {
                let item = Item::from_fetched(topic_id, scan_id, fetched);
                let id = item.id;
                self.items.insert(id, item);
                self.item_order.push(id);
                id
            }
        }
    }
}

/// In-memory [`ScanStore`] with the same guard semantics as the Postgres one.
///
/// Extraction takes a per-item async mutex in place of the row lock. Lock
/// entries are never evicted; the store lives only as long as a test or a
/// dry run.
#[derive(Clone, Default)]
pub struct MemoryScanStore {
    state: Arc<Mutex<State>>,
    item_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert items under a scan regardless of its status.
    pub async fn seed_items(&self, scan_id: Uuid, items: Vec<FetchedItem>) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().await;
        let topic_id = state
            .scans
            .get(&scan_id)
            .map(|s| s.topic_id)
            .ok_or_else(|| anyhow::anyhow!("scan {scan_id} not found"))?;

        let count = items.len() as i64;
        let ids = items
            .into_iter()
            .map(|fetched| state.upsert_item(topic_id, scan_id, fetched))
            .collect();
        if let Some(scan) = state.scans.get_mut(&scan_id) {
            scan.counters.items_fetched += count;
        }
        Ok(ids)
    }

    /// Overwrite a scan's counters.
    pub async fn set_counters(&self, scan_id: Uuid, counters: ScanCounters) {
        if let Some(scan) = self.state.lock().await.scans.get_mut(&scan_id) {
            scan.counters = counters;
        }
    }

    /// Pretend the scan was last touched at `at`.
    pub async fn set_updated_at(&self, scan_id: Uuid, at: DateTime<Utc>) {
        if let Some(scan) = self.state.lock().await.scans.get_mut(&scan_id) {
            scan.updated_at = at;
        }
    }

    /// Write a classification record directly.
    pub async fn put_classification(&self, record: Classification) {
        self.state
            .lock()
            .await
            .classifications
            .insert(record.item_id, record);
    }

    pub async fn classification_count(&self) -> usize {
        self.state.lock().await.classifications.len()
    }

    pub async fn idea_count(&self) -> usize {
        self.state.lock().await.ideas.len()
    }

    async fn item_lock(&self, item_id: Uuid) -> Arc<Mutex<()>> {
        self.item_locks
            .lock()
            .await
            .entry(item_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        self.state
            .lock()
            .await
            .topics
            .insert(topic.id, topic.clone());
        Ok(())
    }

    async fn get_topic(&self, topic_id: Uuid) -> Result<Option<Topic>> {
        Ok(self.state.lock().await.topics.get(&topic_id).cloned())
    }

    async fn get_scan(&self, scan_id: Uuid) -> Result<Option<Scan>> {
        Ok(self.state.lock().await.scans.get(&scan_id).cloned())
    }

    async fn create_scan_if_idle(&self, request: NewScan) -> Result<ScanCreation> {
        let mut state = self.state.lock().await;

        if !state.topics.contains_key(&request.topic_id) {
            return Ok(ScanCreation::TopicNotFound);
        }

        let topic_scans: Vec<&Scan> = state
            .scans
            .values()
            .filter(|s| s.topic_id == request.topic_id)
            .collect();
        if let Some(active) = topic_scans.iter().find(|s| !s.status.is_terminal()) {
            return Ok(ScanCreation::Existing((*active).clone()));
        }

        let has_completed = topic_scans.iter().any(|s| s.status == ScanStatus::Completed);
        let (scan_type, default_days) = if has_completed {
            (ScanType::Rescan, request.rescan_window_days)
        } else {
            (ScanType::Initial, request.initial_window_days)
        };
        let window = request
            .window
            .unwrap_or_else(|| DateWindow::last_days(default_days));

        let scan = Scan::new(request.topic_id, scan_type, window);
        state.scans.insert(scan.id, scan.clone());
        Ok(ScanCreation::Created(scan))
    }

    async fn transition(&self, scan_id: Uuid, from: ScanStatus, to: ScanStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            anyhow::bail!("illegal scan transition {from} -> {to}");
        }

        let mut state = self.state.lock().await;
        let Some(scan) = state.scans.get_mut(&scan_id) else {
            return Ok(false);
        };
        if scan.status != from {
            return Ok(false);
        }

        let now = Utc::now();
        scan.status = to;
        scan.updated_at = now;
        match to {
            ScanStatus::Fetching => {
                scan.started_at.get_or_insert(now);
                scan.counters.items_fetched = 0;
                scan.child_jobs_total = 0;
                scan.child_jobs_done = 0;
            }
            ScanStatus::Classifying => scan.counters.items_classified = 0,
            ScanStatus::Extracting => {
                scan.counters.items_extracted = 0;
                scan.counters.ideas_found = 0;
            }
            ScanStatus::Completed | ScanStatus::Failed => scan.completed_at = Some(now),
            ScanStatus::Pending => {}
        }
        Ok(true)
    }

    async fn fail_scan(&self, scan_id: Uuid, message: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(scan) = state.scans.get_mut(&scan_id) else {
            return Ok(false);
        };
        if scan.status.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now();
        scan.status = ScanStatus::Failed;
        scan.error_message = Some(message.to_string());
        scan.completed_at = Some(now);
        scan.updated_at = now;
        Ok(true)
    }

    async fn stale_scans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Scan>> {
        let state = self.state.lock().await;
        let mut stale: Vec<Scan> = state
            .scans
            .values()
            .filter(|s| !s.status.is_terminal() && s.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.updated_at);
        Ok(stale)
    }

    async fn commit_page(
        &self,
        scan_id: Uuid,
        page: i32,
        items: Vec<FetchedItem>,
        next_checkpoint: Option<String>,
        reply_chunk_size: usize,
    ) -> Result<Option<PageCommit>> {
        let mut state = self.state.lock().await;
        let topic_id = match state.scans.get(&scan_id) {
            Some(scan) if scan.status == ScanStatus::Fetching && scan.pages_fetched == page => {
                scan.topic_id
            }
            _ => return Ok(None),
        };

        let count = items.len() as i64;
        let mut item_ids = Vec::with_capacity(items.len());
        for fetched in items {
            let id = state.upsert_item(topic_id, scan_id, fetched);
            if !item_ids.contains(&id) {
                item_ids.push(id);
            }
        }

        let chunks = reply_chunks(page, &item_ids, reply_chunk_size);
        state.reply_chunks.extend(chunks.iter().map(|chunk| ChunkState {
            scan_id,
            chunk: chunk.clone(),
            done: false,
        }));

        if let Some(scan) = state.scans.get_mut(&scan_id) {
            scan.pages_fetched += 1;
            scan.checkpoint = next_checkpoint;
            scan.counters.items_fetched += count;
            scan.child_jobs_total += chunks.len() as i64;
            scan.updated_at = Utc::now();
        }
        Ok(Some(PageCommit {
            item_ids,
            reply_chunks: chunks,
        }))
    }

    async fn pending_reply_chunks(&self, scan_id: Uuid, page: i32) -> Result<Vec<ReplyChunk>> {
        let state = self.state.lock().await;
        Ok(state
            .reply_chunks
            .iter()
            .filter(|c| c.scan_id == scan_id && c.chunk.page == page && !c.done)
            .map(|c| c.chunk.clone())
            .collect())
    }

    async fn store_replies(&self, item_id: Uuid, replies: Vec<String>) -> Result<()> {
        if let Some(item) = self.state.lock().await.items.get_mut(&item_id) {
            item.replies = replies;
            item.replies_fetched_at = Some(Utc::now());
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_child_job_done(&self, scan_id: Uuid, page: i32, chunk: i32) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(entry) = state
            .reply_chunks
            .iter_mut()
            .find(|c| c.scan_id == scan_id && c.chunk.page == page && c.chunk.chunk == chunk)
        else {
            return Ok(false);
        };
        if entry.done {
            return Ok(false);
        }
        entry.done = true;

        if let Some(scan) = state.scans.get_mut(&scan_id) {
            scan.child_jobs_done += 1;
            scan.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn scan_items(&self, scan_id: Uuid) -> Result<Vec<Item>> {
        let state = self.state.lock().await;
        Ok(state
            .scan_item_ids(scan_id)
            .filter_map(|id| state.items.get(&id).cloned())
            .collect())
    }

    async fn get_classification(&self, item_id: Uuid) -> Result<Option<Classification>> {
        Ok(self.state.lock().await.classifications.get(&item_id).cloned())
    }

    async fn unclassified_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .scan_item_ids(scan_id)
            .filter(|id| !state.is_classified(*id))
            .collect())
    }

    async fn begin_classification(&self, item_id: Uuid, scan_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_classified(item_id) {
            return Ok(false);
        }
        state
            .classifications
            .insert(item_id, Classification::pending(item_id, scan_id));
        Ok(true)
    }

    async fn complete_classification(&self, scan_id: Uuid, record: &Classification) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_classified(record.item_id) {
            return Ok(false);
        }
        match state.scans.get_mut(&scan_id) {
            Some(scan) if scan.status == ScanStatus::Classifying => {
                scan.counters.items_classified += 1;
                scan.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }
        state.classifications.insert(record.item_id, record.clone());
        Ok(true)
    }

    async fn gap_fill_classifications(&self, scan_id: Uuid, reason: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let missing: Vec<Uuid> = state
            .scan_item_ids(scan_id)
            .filter(|id| !state.is_classified(*id))
            .collect();

        for item_id in &missing {
            state.classifications.insert(
                *item_id,
                Classification::synthetic_discard(*item_id, scan_id, reason),
            );
        }
        Ok(missing.len() as u64)
    }

    async fn reconcile_classified(&self, scan_id: Uuid) -> Result<i64> {
        let mut state = self.state.lock().await;
        let count = state
            .scan_item_ids(scan_id)
            .filter(|id| state.is_classified(*id))
            .count() as i64;

        if let Some(scan) = state.scans.get_mut(&scan_id) {
            scan.counters.items_classified = count;
            scan.updated_at = Utc::now();
        }
        Ok(count)
    }

    async fn extractable_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .scan_item_ids(scan_id)
            .filter(|id| {
                let extractable = state
                    .classifications
                    .get(id)
                    .is_some_and(|c| c.final_decision.is_extractable());
                let pending = state.items.get(id).is_some_and(|i| i.extracted_at.is_none());
                extractable && pending
            })
            .collect())
    }

    async fn lock_item_for_extraction(&self, item_id: Uuid) -> Result<Option<Box<dyn ExtractionLock>>> {
        let guard = self.item_lock(item_id).await.lock_owned().await;

        let state = self.state.lock().await;
        let Some(item) = state.items.get(&item_id).cloned() else {
            return Ok(None);
        };
        if item.extracted_at.is_some() {
            return Ok(None);
        }
        let classification = state.classifications.get(&item_id).cloned();
        drop(state);

        Ok(Some(Box::new(MemoryExtractionLock {
            store: self.clone(),
            item,
            classification,
            _guard: guard,
        })))
    }

    async fn reconcile_extracted(&self, scan_id: Uuid) -> Result<(i64, i64)> {
        let mut state = self.state.lock().await;
        let extracted = state
            .scan_item_ids(scan_id)
            .filter(|id| state.items.get(id).is_some_and(|i| i.extracted_at.is_some()))
            .count() as i64;
        let ideas = state.ideas.iter().filter(|i| i.scan_id == scan_id).count() as i64;

        if let Some(scan) = state.scans.get_mut(&scan_id) {
            scan.counters.items_extracted = extracted;
            scan.counters.ideas_found = ideas;
            scan.updated_at = Utc::now();
        }
        Ok((extracted, ideas))
    }

    async fn ideas_for_item(&self, item_id: Uuid) -> Result<Vec<Idea>> {
        let state = self.state.lock().await;
        Ok(state
            .ideas
            .iter()
            .filter(|i| i.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn ideas_for_scan(&self, scan_id: Uuid) -> Result<Vec<Idea>> {
        let state = self.state.lock().await;
        let mut ideas: Vec<Idea> = state
            .ideas
            .iter()
            .filter(|i| i.scan_id == scan_id)
            .cloned()
            .collect();
        ideas.sort_by(|a, b| b.overall_score.cmp(&a.overall_score));
        Ok(ideas)
    }
}

struct MemoryExtractionLock {
    store: MemoryScanStore,
    item: Item,
    classification: Option<Classification>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl ExtractionLock for MemoryExtractionLock {
    fn item(&self) -> &Item {
        &self.item
    }

    fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    async fn commit(self: Box<Self>, scan_id: Uuid, ideas: &[Idea]) -> Result<bool> {
        let mut state = self.store.state.lock().await;

        match state.scans.get_mut(&scan_id) {
            Some(scan) if scan.status == ScanStatus::Extracting => {
                scan.counters.items_extracted += 1;
                scan.counters.ideas_found += ideas.len() as i64;
                scan.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }

        state.ideas.extend(ideas.iter().cloned());
        if let Some(item) = state.items.get_mut(&self.item.id) {
            item.extracted_at = Some(Utc::now());
            item.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideascout_common::Decision;

    fn fetched(source_id: &str) -> FetchedItem {
        FetchedItem {
            source_id: source_id.into(),
            title: format!("post {source_id}"),
            body: String::new(),
            url: None,
            author: None,
            subreddit: Some("saas".into()),
            upvotes: 1,
            num_comments: 0,
            posted_at: None,
        }
    }

    async fn fetching_scan(store: &MemoryScanStore) -> Scan {
        let topic = Topic::new("invoicing", vec!["freelance".into()], vec![]);
        store.create_topic(&topic).await.unwrap();
        let ScanCreation::Created(scan) = store
            .create_scan_if_idle(NewScan {
                topic_id: topic.id,
                window: None,
                initial_window_days: 30,
                rescan_window_days: 7,
            })
            .await
            .unwrap()
        else {
            panic!("expected a new scan");
        };
        assert!(store
            .transition(scan.id, ScanStatus::Pending, ScanStatus::Fetching)
            .await
            .unwrap());
        scan
    }

    #[tokio::test]
    async fn page_commit_is_compare_and_set() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;

        let first = store
            .commit_page(scan.id, 0, vec![fetched("a"), fetched("b")], Some("c1".into()), 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.item_ids.len(), 2);
        assert_eq!(first.reply_chunks.len(), 1);

        // Redelivery of page 0 is rejected.
        let again = store
            .commit_page(scan.id, 0, vec![fetched("a"), fetched("b")], Some("c1".into()), 10)
            .await
            .unwrap();
        assert!(again.is_none());

        let scan = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.pages_fetched, 1);
        assert_eq!(scan.counters.items_fetched, 2);
        assert_eq!(scan.child_jobs_total, 1);
        assert_eq!(scan.checkpoint.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn reply_chunk_completion_counts_once() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;
        let commit = store
            .commit_page(scan.id, 0, vec![fetched("a"), fetched("b")], None, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commit.reply_chunks.len(), 2);
        assert_eq!(commit.reply_chunks[1].item_ids, vec![commit.item_ids[1]]);

        assert!(store.record_child_job_done(scan.id, 0, 0).await.unwrap());
        assert!(!store.record_child_job_done(scan.id, 0, 0).await.unwrap());
        assert!(!store.record_child_job_done(scan.id, 0, 9).await.unwrap());

        let scan_row = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(scan_row.child_jobs_total, 2);
        assert_eq!(scan_row.child_jobs_done, 1);

        let pending = store.pending_reply_chunks(scan.id, 0).await.unwrap();
        assert_eq!(pending, vec![commit.reply_chunks[1].clone()]);
    }

    #[tokio::test]
    async fn crashed_classification_attempt_is_replaced() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;
        let ids = store.seed_items(scan.id, vec![fetched("a")]).await.unwrap();

        let mut leftover = Classification::pending(ids[0], scan.id);
        leftover.primary.completed = true;
        store.put_classification(leftover).await;

        assert!(store.begin_classification(ids[0], scan.id).await.unwrap());
        let record = store.get_classification(ids[0]).await.unwrap().unwrap();
        assert!(!record.primary.completed);
        assert_eq!(store.classification_count().await, 1);
    }

    #[tokio::test]
    async fn refetched_items_are_updated_not_duplicated() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;

        let first = store.seed_items(scan.id, vec![fetched("a")]).await.unwrap();
        let mut bumped = fetched("a");
        bumped.upvotes = 40;
        let second = store.seed_items(scan.id, vec![bumped]).await.unwrap();

        assert_eq!(first, second);
        let item = store.get_item(first[0]).await.unwrap().unwrap();
        assert_eq!(item.upvotes, 40);
        assert_eq!(store.scan_items(scan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_active_scan_is_refused() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;

        let again = store
            .create_scan_if_idle(NewScan {
                topic_id: scan.topic_id,
                window: None,
                initial_window_days: 30,
                rescan_window_days: 7,
            })
            .await
            .unwrap();
        assert!(matches!(again, ScanCreation::Existing(s) if s.id == scan.id));
    }

    #[tokio::test]
    async fn extraction_lock_serialises_duplicate_workers() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;
        let ids = store.seed_items(scan.id, vec![fetched("a")]).await.unwrap();
        store.transition(scan.id, ScanStatus::Fetching, ScanStatus::Classifying).await.unwrap();
        store.transition(scan.id, ScanStatus::Classifying, ScanStatus::Extracting).await.unwrap();

        let lock = store.lock_item_for_extraction(ids[0]).await.unwrap().unwrap();

        let contender = {
            let store = store.clone();
            let item_id = ids[0];
            tokio::spawn(async move {
                store
                    .lock_item_for_extraction(item_id)
                    .await
                    .map(|l| l.is_some())
            })
        };

        assert!(lock.commit(scan.id, &[]).await.unwrap());
        // Once the holder commits, the waiting worker sees the item as done.
        assert!(!contender.await.unwrap().unwrap());

        let scan = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.counters.items_extracted, 1);
    }

    #[tokio::test]
    async fn gap_fill_leaves_terminal_records_alone() {
        let store = MemoryScanStore::new();
        let scan = fetching_scan(&store).await;
        let ids = store
            .seed_items(scan.id, vec![fetched("a"), fetched("b")])
            .await
            .unwrap();

        let mut kept = Classification::synthetic_discard(ids[0], scan.id, "x");
        kept.final_decision = Decision::Keep;
        kept.reason = None;
        store.put_classification(kept).await;

        let filled = store.gap_fill_classifications(scan.id, "late").await.unwrap();
        assert_eq!(filled, 1);
        assert_eq!(
            store.get_classification(ids[0]).await.unwrap().unwrap().final_decision,
            Decision::Keep
        );
        assert_eq!(
            store.get_classification(ids[1]).await.unwrap().unwrap().reason.as_deref(),
            Some("late")
        );
    }
}

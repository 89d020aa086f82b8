use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use ideascout_common::{Job, Queue};

use crate::queue::{FailOutcome, JobQueue, ReservedJob};

#[derive(Debug, Clone)]
struct Entry {
    id: Uuid,
    job: Job,
    attempts: i32,
    batch_id: Option<Uuid>,
}

#[derive(Debug)]
struct Batch {
    remaining: usize,
    then: Job,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    running: HashMap<Uuid, Entry>,
    batches: HashMap<Uuid, Batch>,
    buried: Vec<(Job, String)>,
    completed: usize,
}

impl State {
    fn push(&mut self, job: Job, batch_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.ready.push_back(Entry {
            id,
            job,
            attempts: 0,
            batch_id,
        });
        id
    }

    fn finish_batch_member(&mut self, batch_id: Option<Uuid>) {
        let Some(batch_id) = batch_id else {
            return;
        };
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            return;
        };
        batch.remaining -= 1;
        if batch.remaining == 0 {
            if let Some(batch) = self.batches.remove(&batch_id) {
                self.push(batch.then, None);
            }
        }
    }
}

/// In-process [`JobQueue`] for tests and dry runs.
///
/// Delays are not honoured: a delayed or retried job simply goes to the back
/// of the queue. Leases never expire.
#[derive(Clone)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<State>>,
    max_attempts: i32,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MemoryJobQueue {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_attempts,
        }
    }

    /// Jobs waiting to be reserved, in order.
    pub async fn pending(&self) -> Vec<Job> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|e| e.job.clone())
            .collect()
    }

    pub async fn buried(&self) -> Vec<(Job, String)> {
        self.state.lock().await.buried.clone()
    }

    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.completed
    }

    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.running.is_empty()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &Job, _delay: Duration) -> Result<Uuid> {
        Ok(self.state.lock().await.push(job.clone(), None))
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>, then: Job) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        let batch_id = Uuid::new_v4();

        if jobs.is_empty() {
            state.push(then, None);
            return Ok(batch_id);
        }

        state.batches.insert(
            batch_id,
            Batch {
                remaining: jobs.len(),
                then,
            },
        );
        for job in jobs {
            state.push(job, Some(batch_id));
        }
        Ok(batch_id)
    }

    async fn reserve(&self, queues: &[Queue]) -> Result<Option<ReservedJob>> {
        let mut state = self.state.lock().await;
        let Some(pos) = state
            .ready
            .iter()
            .position(|e| queues.contains(&e.job.queue()))
        else {
            return Ok(None);
        };
        let Some(mut entry) = state.ready.remove(pos) else {
            return Ok(None);
        };

        entry.attempts += 1;
        let reserved = ReservedJob {
            id: entry.id,
            job: entry.job.clone(),
            attempts: entry.attempts,
        };
        state.running.insert(entry.id, entry);
        Ok(Some(reserved))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.running.remove(&id) {
            state.completed += 1;
            state.finish_batch_member(entry.batch_id);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailOutcome> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.running.remove(&id) else {
            return Ok(FailOutcome::Ignored);
        };

        if entry.attempts >= self.max_attempts {
            let batch_id = entry.batch_id;
            state.buried.push((entry.job, error.to_string()));
            state.finish_batch_member(batch_id);
            Ok(FailOutcome::Buried)
        } else {
            state.ready.push_back(entry);
            Ok(FailOutcome::Retrying)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(scan_id: Uuid) -> Job {
        Job::ClassifyChunk {
            scan_id,
            item_ids: vec![Uuid::new_v4()],
        }
    }

    #[tokio::test]
    async fn then_job_runs_once_after_last_member() {
        let queue = MemoryJobQueue::new(1);
        let scan_id = Uuid::new_v4();
        queue
            .enqueue_batch(vec![chunk(scan_id), chunk(scan_id)], Job::FinalizeClassify { scan_id })
            .await
            .unwrap();

        let first = queue.reserve(&[Queue::Classify]).await.unwrap().unwrap();
        let second = queue.reserve(&[Queue::Classify]).await.unwrap().unwrap();

        queue.complete(first.id).await.unwrap();
        queue.complete(first.id).await.unwrap();
        assert!(queue.pending().await.is_empty());

        // A buried member still counts as finished.
        assert_eq!(queue.fail(second.id, "boom").await.unwrap(), FailOutcome::Buried);
        assert_eq!(queue.pending().await, vec![Job::FinalizeClassify { scan_id }]);
    }

    #[tokio::test]
    async fn failed_job_is_redelivered_until_attempts_run_out() {
        let queue = MemoryJobQueue::new(2);
        let scan_id = Uuid::new_v4();
        queue.enqueue(&Job::BeginClassify { scan_id }, Duration::ZERO).await.unwrap();

        let first = queue.reserve(&[Queue::Classify]).await.unwrap().unwrap();
        assert_eq!(queue.fail(first.id, "e1").await.unwrap(), FailOutcome::Retrying);

        let second = queue.reserve(&[Queue::Classify]).await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(queue.fail(second.id, "e2").await.unwrap(), FailOutcome::Buried);
        assert_eq!(queue.buried().await.len(), 1);
        assert!(queue.is_idle().await);
    }

    #[tokio::test]
    async fn reserve_only_takes_requested_queues() {
        let queue = MemoryJobQueue::default();
        let scan_id = Uuid::new_v4();
        queue.enqueue(&Job::BeginExtract { scan_id }, Duration::ZERO).await.unwrap();

        assert!(queue.reserve(&[Queue::Fetch]).await.unwrap().is_none());
        assert!(queue.reserve(&[Queue::Extract]).await.unwrap().is_some());
    }
}

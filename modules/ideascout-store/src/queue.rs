//! Durable work queue with at-least-once delivery and batch completion hooks.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use ideascout_common::{Job, Queue};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// A reserved job is redelivered if not completed within the lease.
    pub lease: Duration,
    pub max_attempts: i32,
    pub retry_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            max_attempts: 5,
            retry_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub id: Uuid,
    pub job: Job,
    /// Deliveries so far, this one included.
    pub attempts: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-queued for another attempt.
    Retrying,
    /// Attempts exhausted. The job counts as finished for its batch.
    Buried,
    /// The job was not running (already completed or failed).
    Ignored,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &Job, delay: Duration) -> Result<Uuid>;

    /// Enqueue `jobs` as one batch. `then` is enqueued exactly once, when the
    /// last member finishes (completed or buried). An empty batch enqueues
    /// `then` immediately.
    async fn enqueue_batch(&self, jobs: Vec<Job>, then: Job) -> Result<Uuid>;

    async fn reserve(&self, queues: &[Queue]) -> Result<Option<ReservedJob>>;

    /// Completing a job twice is a no-op.
    async fn complete(&self, id: Uuid) -> Result<()>;

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailOutcome>;
}

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use ideascout_common::{Job, Queue};

use crate::queue::{FailOutcome, JobQueue, QueueSettings, ReservedJob};

/// Postgres-backed [`JobQueue`]. Workers lease rows with `FOR UPDATE SKIP LOCKED`;
/// a lease that expires makes the job visible again.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    settings: QueueSettings,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

async fn insert_job(
    tx: &mut Transaction<'_, Postgres>,
    job: &Job,
    delay: Duration,
    max_attempts: i32,
    batch_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO jobs (id, queue, payload, max_attempts, run_at, batch_id)
        VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5), $6)
        "#,
    )
    .bind(id)
    .bind(job.queue().as_str())
    .bind(serde_json::to_value(job)?)
    .bind(max_attempts)
    .bind(secs(delay))
    .bind(batch_id)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Count one member of the batch as finished; the member that finishes it
/// enqueues the `then` job.
async fn finish_batch_member(
    tx: &mut Transaction<'_, Postgres>,
    batch_id: Uuid,
    max_attempts: i32,
) -> Result<()> {
    let row = sqlx::query_as::<_, (i32, i32, serde_json::Value)>(
        r#"
        UPDATE job_batches SET finished = finished + 1
        WHERE id = $1
        RETURNING finished, total, then_payload
        "#,
    )
    .bind(batch_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some((finished, total, then_payload)) = row else {
        return Ok(());
    };
    if finished != total {
        return Ok(());
    }

    let then: Job = serde_json::from_value(then_payload)?;
    sqlx::query("UPDATE job_batches SET released_at = now() WHERE id = $1")
        .bind(batch_id)
        .execute(&mut **tx)
        .await?;
    insert_job(tx, &then, Duration::ZERO, max_attempts, None).await?;
    debug!(%batch_id, job = then.name(), "Batch finished, released follow-up job");
    Ok(())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &Job, delay: Duration) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        let id = insert_job(&mut tx, job, delay, self.settings.max_attempts, None).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>, then: Job) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        let batch_id = Uuid::new_v4();

        if jobs.is_empty() {
            insert_job(&mut tx, &then, Duration::ZERO, self.settings.max_attempts, None).await?;
            tx.commit().await?;
            return Ok(batch_id);
        }

        sqlx::query(
            "INSERT INTO job_batches (id, total, then_queue, then_payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(batch_id)
        .bind(jobs.len() as i32)
        .bind(then.queue().as_str())
        .bind(serde_json::to_value(&then)?)
        .execute(&mut *tx)
        .await?;

        for job in &jobs {
            insert_job(&mut tx, job, Duration::ZERO, self.settings.max_attempts, Some(batch_id)).await?;
        }

        tx.commit().await?;
        Ok(batch_id)
    }

    async fn reserve(&self, queues: &[Queue]) -> Result<Option<ReservedJob>> {
        let names: Vec<&str> = queues.iter().map(Queue::as_str).collect();

        let row = sqlx::query_as::<_, (Uuid, serde_json::Value, i32)>(
            r#"
            UPDATE jobs SET
                status = 'running',
                attempts = attempts + 1,
                locked_until = now() + make_interval(secs => $2),
                updated_at = now()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ANY($1)
                  AND ((status = 'ready' AND run_at <= now())
                       OR (status = 'running' AND locked_until < now()))
                ORDER BY run_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(&names)
        .bind(secs(self.settings.lease))
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, payload, attempts)) = row else {
            return Ok(None);
        };

        match serde_json::from_value::<Job>(payload) {
            Ok(job) => Ok(Some(ReservedJob { id, job, attempts })),
            Err(e) => {
                // Unreadable payloads can never succeed.
                warn!(job_id = %id, error = %e, "Burying job with unreadable payload");
                sqlx::query("UPDATE jobs SET status = 'buried', last_error = $2 WHERE id = $1")
                    .bind(id)
                    .bind(e.to_string())
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (Option<Uuid>,)>(
            r#"
            UPDATE jobs SET status = 'done', locked_until = NULL, updated_at = now()
            WHERE id = $1 AND status = 'running'
            RETURNING batch_id
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some((Some(batch_id),)) => {
                finish_batch_member(&mut tx, batch_id, self.settings.max_attempts).await?
            }
            Some((None,)) => {}
            None => debug!(job_id = %id, "Job already finished, ignoring completion"),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<FailOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (i32, i32, Option<Uuid>)>(
            "SELECT attempts, max_attempts, batch_id FROM jobs WHERE id = $1 AND status = 'running' FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts, max_attempts, batch_id)) = row else {
            return Ok(FailOutcome::Ignored);
        };

        let outcome = if attempts >= max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs SET status = 'buried', last_error = $2, locked_until = NULL, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            if let Some(batch_id) = batch_id {
                finish_batch_member(&mut tx, batch_id, self.settings.max_attempts).await?;
            }
            FailOutcome::Buried
        } else {
            let delay = self.settings.retry_delay * attempts.max(1) as u32;
            sqlx::query(
                r#"
                UPDATE jobs SET
                    status = 'ready',
                    last_error = $2,
                    locked_until = NULL,
                    run_at = now() + make_interval(secs => $3),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error)
            .bind(secs(delay))
            .execute(&mut *tx)
            .await?;
            FailOutcome::Retrying
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

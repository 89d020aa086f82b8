use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use ideascout_common::{
    Classification, DateWindow, FetchedItem, Idea, Item, Scan, ScanStatus, ScanType, Topic,
};

use super::rows::{ClassificationRow, IdeaRow, ItemRow, ScanRow, TopicRow};
use crate::store::{
    reply_chunks, ExtractionLock, NewScan, PageCommit, ReplyChunk, ScanCreation, ScanStore,
};

const ACTIVE: &str = "('pending', 'fetching', 'classifying', 'extracting')";

/// Postgres-backed [`ScanStore`].
#[derive(Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }
}

async fn insert_scan(tx: &mut Transaction<'_, Postgres>, scan: &Scan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scans (id, topic_id, scan_type, status, window_from, window_to, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(scan.id)
    .bind(scan.topic_id)
    .bind(scan.scan_type.as_str())
    .bind(scan.status.as_str())
    .bind(scan.window.from)
    .bind(scan.window.to)
    .bind(scan.created_at)
    .bind(scan.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_classification(
    tx: &mut Transaction<'_, Postgres>,
    record: &Classification,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO classifications (
            item_id, scan_id,
            primary_provider, primary_verdict, primary_confidence, primary_category, primary_reasoning, primary_completed,
            secondary_provider, secondary_verdict, secondary_confidence, secondary_category, secondary_reasoning, secondary_completed,
            combined_score, final_decision, reason, classified_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (item_id) DO UPDATE SET
            scan_id = EXCLUDED.scan_id,
            primary_provider = EXCLUDED.primary_provider,
            primary_verdict = EXCLUDED.primary_verdict,
            primary_confidence = EXCLUDED.primary_confidence,
            primary_category = EXCLUDED.primary_category,
            primary_reasoning = EXCLUDED.primary_reasoning,
            primary_completed = EXCLUDED.primary_completed,
            secondary_provider = EXCLUDED.secondary_provider,
            secondary_verdict = EXCLUDED.secondary_verdict,
            secondary_confidence = EXCLUDED.secondary_confidence,
            secondary_category = EXCLUDED.secondary_category,
            secondary_reasoning = EXCLUDED.secondary_reasoning,
            secondary_completed = EXCLUDED.secondary_completed,
            combined_score = EXCLUDED.combined_score,
            final_decision = EXCLUDED.final_decision,
            reason = EXCLUDED.reason,
            classified_at = EXCLUDED.classified_at,
            updated_at = now()
        "#,
    )
    .bind(record.item_id)
    .bind(record.scan_id)
    .bind(&record.primary.provider)
    .bind(record.primary.verdict.map(|v| v.as_str()))
    .bind(record.primary.confidence)
    .bind(&record.primary.category)
    .bind(&record.primary.reasoning)
    .bind(record.primary.completed)
    .bind(&record.secondary.provider)
    .bind(record.secondary.verdict.map(|v| v.as_str()))
    .bind(record.secondary.confidence)
    .bind(&record.secondary.category)
    .bind(&record.secondary.reasoning)
    .bind(record.secondary.completed)
    .bind(record.combined_score)
    .bind(record.final_decision.as_str())
    .bind(&record.reason)
    .bind(record.classified_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        sqlx::query(
            "INSERT INTO topics (id, name, subreddits, keywords, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(topic.id)
        .bind(&topic.name)
        .bind(&topic.subreddits)
        .bind(&topic.keywords)
        .bind(topic.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_topic(&self, topic_id: Uuid) -> Result<Option<Topic>> {
        let row = sqlx::query_as::<_, TopicRow>("SELECT * FROM topics WHERE id = $1")
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Topic::from))
    }

    async fn get_scan(&self, scan_id: Uuid) -> Result<Option<Scan>> {
        let row = sqlx::query_as::<_, ScanRow>("SELECT * FROM scans WHERE id = $1")
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Scan::try_from).transpose()
    }

    async fn create_scan_if_idle(&self, request: NewScan) -> Result<ScanCreation> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM topics WHERE id = $1 FOR UPDATE")
            .bind(request.topic_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(ScanCreation::TopicNotFound);
        }

        let active = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT * FROM scans WHERE topic_id = $1 AND status IN {ACTIVE} LIMIT 1"
        ))
        .bind(request.topic_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = active {
            tx.commit().await?;
            return Ok(ScanCreation::Existing(Scan::try_from(row)?));
        }

        let has_completed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM scans WHERE topic_id = $1 AND status = 'completed')",
        )
        .bind(request.topic_id)
        .fetch_one(&mut *tx)
        .await?;

        let (scan_type, default_days) = if has_completed {
            (ScanType::Rescan, request.rescan_window_days)
        } else {
            (ScanType::Initial, request.initial_window_days)
        };
        let window = request
            .window
            .unwrap_or_else(|| DateWindow::last_days(default_days));

        let scan = Scan::new(request.topic_id, scan_type, window);
        insert_scan(&mut tx, &scan).await?;
        tx.commit().await?;

        Ok(ScanCreation::Created(scan))
    }

    async fn transition(&self, scan_id: Uuid, from: ScanStatus, to: ScanStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            anyhow::bail!("illegal scan transition {from} -> {to}");
        }

        let result = sqlx::query(
            r#"
            UPDATE scans SET
                status = $3,
                updated_at = now(),
                started_at = CASE WHEN $3 = 'fetching' THEN COALESCE(started_at, now()) ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'failed') THEN now() ELSE completed_at END,
                items_fetched = CASE WHEN $3 = 'fetching' THEN 0 ELSE items_fetched END,
                child_jobs_total = CASE WHEN $3 = 'fetching' THEN 0 ELSE child_jobs_total END,
                child_jobs_done = CASE WHEN $3 = 'fetching' THEN 0 ELSE child_jobs_done END,
                items_classified = CASE WHEN $3 = 'classifying' THEN 0 ELSE items_classified END,
                items_extracted = CASE WHEN $3 = 'extracting' THEN 0 ELSE items_extracted END,
                ideas_found = CASE WHEN $3 = 'extracting' THEN 0 ELSE ideas_found END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(scan_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_scan(&self, scan_id: Uuid, message: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE scans
            SET status = 'failed', error_message = $2, completed_at = now(), updated_at = now()
            WHERE id = $1 AND status IN {ACTIVE}
            "#
        ))
        .bind(scan_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn stale_scans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Scan>> {
        let rows = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT * FROM scans WHERE status IN {ACTIVE} AND updated_at < $1 ORDER BY updated_at"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Scan::try_from).collect()
    }

    async fn commit_page(
        &self,
        scan_id: Uuid,
        page: i32,
        items: Vec<FetchedItem>,
        next_checkpoint: Option<String>,
        reply_chunk_size: usize,
    ) -> Result<Option<PageCommit>> {
        let mut tx = self.pool.begin().await?;

        let topic_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE scans SET
                pages_fetched = pages_fetched + 1,
                checkpoint = $3,
                items_fetched = items_fetched + $4,
                updated_at = now()
            WHERE id = $1 AND status = 'fetching' AND pages_fetched = $2
            RETURNING topic_id
            "#,
        )
        .bind(scan_id)
        .bind(page)
        .bind(&next_checkpoint)
        .bind(items.len() as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(topic_id) = topic_id else {
            debug!(%scan_id, page, "Page already committed or scan not fetching");
            return Ok(None);
        };

        let mut item_ids = Vec::with_capacity(items.len());
        for item in items {
            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO items (id, topic_id, scan_id, source_id, title, body, url, author,
                                   subreddit, upvotes, num_comments, posted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (topic_id, source_id) DO UPDATE SET
                    scan_id = EXCLUDED.scan_id,
                    title = EXCLUDED.title,
                    body = EXCLUDED.body,
                    upvotes = EXCLUDED.upvotes,
                    num_comments = EXCLUDED.num_comments,
                    updated_at = now()
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(topic_id)
            .bind(scan_id)
            .bind(&item.source_id)
            .bind(&item.title)
            .bind(&item.body)
            .bind(&item.url)
            .bind(&item.author)
            .bind(&item.subreddit)
            .bind(item.upvotes)
            .bind(item.num_comments)
            .bind(item.posted_at)
            .fetch_one(&mut *tx)
            .await?;

            if !item_ids.contains(&id) {
                item_ids.push(id);
            }
        }

        let chunks = reply_chunks(page, &item_ids, reply_chunk_size);
        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO reply_chunks (scan_id, page, chunk, item_ids) VALUES ($1, $2, $3, $4)",
            )
            .bind(scan_id)
            .bind(chunk.page)
            .bind(chunk.chunk)
            .bind(&chunk.item_ids)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE scans SET child_jobs_total = child_jobs_total + $2 WHERE id = $1")
            .bind(scan_id)
            .bind(chunks.len() as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(PageCommit {
            item_ids,
            reply_chunks: chunks,
        }))
    }

    async fn pending_reply_chunks(&self, scan_id: Uuid, page: i32) -> Result<Vec<ReplyChunk>> {
        let rows = sqlx::query_as::<_, (i32, i32, Vec<Uuid>)>(
            r#"
            SELECT page, chunk, item_ids FROM reply_chunks
            WHERE scan_id = $1 AND page = $2 AND done_at IS NULL
            ORDER BY chunk
            "#,
        )
        .bind(scan_id)
        .bind(page)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(page, chunk, item_ids)| ReplyChunk {
                page,
                chunk,
                item_ids,
            })
            .collect())
    }

    async fn store_replies(&self, item_id: Uuid, replies: Vec<String>) -> Result<()> {
        sqlx::query(
            "UPDATE items SET replies = $2, replies_fetched_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(item_id)
        .bind(serde_json::to_value(&replies)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_child_job_done(&self, scan_id: Uuid, page: i32, chunk: i32) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE reply_chunks SET done_at = now()
            WHERE scan_id = $1 AND page = $2 AND chunk = $3 AND done_at IS NULL
            "#,
        )
        .bind(scan_id)
        .bind(page)
        .bind(chunk)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if marked == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE scans SET child_jobs_done = child_jobs_done + 1, updated_at = now() WHERE id = $1",
        )
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Item::from))
    }

    async fn scan_items(&self, scan_id: Uuid) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT * FROM items WHERE scan_id = $1 ORDER BY created_at, id",
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    async fn get_classification(&self, item_id: Uuid) -> Result<Option<Classification>> {
        let row = sqlx::query_as::<_, ClassificationRow>(
            "SELECT * FROM classifications WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Classification::try_from).transpose()
    }

    async fn unclassified_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT i.id FROM items i
            LEFT JOIN classifications c ON c.item_id = i.id
            WHERE i.scan_id = $1 AND (c.item_id IS NULL OR c.final_decision = 'pending')
            ORDER BY i.created_at, i.id
            "#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn begin_classification(&self, item_id: Uuid, scan_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Leftover of a crashed attempt.
        sqlx::query("DELETE FROM classifications WHERE item_id = $1 AND final_decision = 'pending'")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO classifications (item_id, scan_id) VALUES ($1, $2) ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(item_id)
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;

        let decision = sqlx::query_scalar::<_, String>(
            "SELECT final_decision FROM classifications WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(decision == "pending")
    }

    async fn complete_classification(&self, scan_id: Uuid, record: &Classification) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT final_decision FROM classifications WHERE item_id = $1 FOR UPDATE",
        )
        .bind(record.item_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some_and(|d| d != "pending") {
            debug!(%scan_id, item_id = %record.item_id, "Classification already terminal");
            return Ok(false);
        }

        let bumped = sqlx::query(
            r#"
            UPDATE scans SET items_classified = items_classified + 1, updated_at = now()
            WHERE id = $1 AND status = 'classifying'
            "#,
        )
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            debug!(%scan_id, item_id = %record.item_id, "Scan left classifying, dropping result");
            return Ok(false);
        }

        upsert_classification(&mut tx, record).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn gap_fill_classifications(&self, scan_id: Uuid, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO classifications (item_id, scan_id, combined_score, final_decision, reason, classified_at)
            SELECT i.id, $1, 0, 'discard', $2, now() FROM items i WHERE i.scan_id = $1
            ON CONFLICT (item_id) DO UPDATE SET
                scan_id = EXCLUDED.scan_id,
                combined_score = 0,
                final_decision = 'discard',
                reason = EXCLUDED.reason,
                classified_at = now(),
                updated_at = now()
            WHERE classifications.final_decision = 'pending'
            "#,
        )
        .bind(scan_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reconcile_classified(&self, scan_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE scans SET
                items_classified = (
                    SELECT count(*) FROM items i
                    JOIN classifications c ON c.item_id = i.id
                    WHERE i.scan_id = $1 AND c.final_decision <> 'pending'
                ),
                updated_at = now()
            WHERE id = $1
            RETURNING items_classified
            "#,
        )
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn extractable_item_ids(&self, scan_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT i.id FROM items i
            JOIN classifications c ON c.item_id = i.id
            WHERE i.scan_id = $1
              AND c.final_decision IN ('keep', 'borderline')
              AND i.extracted_at IS NULL
            ORDER BY i.created_at, i.id
            "#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn lock_item_for_extraction(&self, item_id: Uuid) -> Result<Option<Box<dyn ExtractionLock>>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE id = $1 FOR UPDATE")
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        if row.extracted_at.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let classification = sqlx::query_as::<_, ClassificationRow>(
            "SELECT * FROM classifications WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Classification::try_from)
        .transpose()?;

        Ok(Some(Box::new(PgExtractionLock {
            tx,
            item: Item::from(row),
            classification,
        })))
    }

    async fn reconcile_extracted(&self, scan_id: Uuid) -> Result<(i64, i64)> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE scans SET
                items_extracted = (
                    SELECT count(*) FROM items WHERE scan_id = $1 AND extracted_at IS NOT NULL
                ),
                ideas_found = (SELECT count(*) FROM ideas WHERE scan_id = $1),
                updated_at = now()
            WHERE id = $1
            RETURNING items_extracted, ideas_found
            "#,
        )
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or((0, 0)))
    }

    async fn ideas_for_item(&self, item_id: Uuid) -> Result<Vec<Idea>> {
        let rows = sqlx::query_as::<_, IdeaRow>(
            "SELECT * FROM ideas WHERE item_id = $1 ORDER BY created_at, id",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Idea::try_from).collect()
    }

    async fn ideas_for_scan(&self, scan_id: Uuid) -> Result<Vec<Idea>> {
        let rows = sqlx::query_as::<_, IdeaRow>(
            "SELECT * FROM ideas WHERE scan_id = $1 ORDER BY overall_score DESC, created_at",
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Idea::try_from).collect()
    }
}

/// Holds `SELECT ... FOR UPDATE` on the item row until commit or release.
struct PgExtractionLock {
    tx: Transaction<'static, Postgres>,
    item: Item,
    classification: Option<Classification>,
}

#[async_trait]
impl ExtractionLock for PgExtractionLock {
    fn item(&self) -> &Item {
        &self.item
    }

    fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    async fn commit(self: Box<Self>, scan_id: Uuid, ideas: &[Idea]) -> Result<bool> {
        let PgExtractionLock { mut tx, item, .. } = *self;

        let bumped = sqlx::query(
            r#"
            UPDATE scans SET
                items_extracted = items_extracted + 1,
                ideas_found = ideas_found + $2,
                updated_at = now()
            WHERE id = $1 AND status = 'extracting'
            "#,
        )
        .bind(scan_id)
        .bind(ideas.len() as i64)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for idea in ideas {
            sqlx::query(
                r#"
                INSERT INTO ideas (id, item_id, scan_id, topic_id, title, problem, solution, target_audience,
                                   market_demand, pain_intensity, competition, feasibility, monetization,
                                   overall_score, classification_status, starred, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(idea.id)
            .bind(idea.item_id)
            .bind(idea.scan_id)
            .bind(idea.topic_id)
            .bind(&idea.title)
            .bind(&idea.problem)
            .bind(&idea.solution)
            .bind(&idea.target_audience)
            .bind(idea.market_demand)
            .bind(idea.pain_intensity)
            .bind(idea.competition)
            .bind(idea.feasibility)
            .bind(idea.monetization)
            .bind(idea.overall_score)
            .bind(idea.classification_status.as_str())
            .bind(idea.starred)
            .bind(idea.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE items SET extracted_at = now(), updated_at = now() WHERE id = $1")
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// Row types and their conversions into domain types.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ideascout_common::{
    Classification, DateWindow, Idea, Item, ModelSlot, Scan, ScanCounters, Topic,
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TopicRow {
    pub id: Uuid,
    pub name: String,
    pub subreddits: Vec<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TopicRow> for Topic {
    fn from(row: TopicRow) -> Self {
        Topic {
            id: row.id,
            name: row.name,
            subreddits: row.subreddits,
            keywords: row.keywords,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ScanRow {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub scan_type: String,
    pub status: String,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub items_fetched: i64,
    pub items_classified: i64,
    pub items_extracted: i64,
    pub ideas_found: i64,
    pub checkpoint: Option<String>,
    pub pages_fetched: i32,
    pub child_jobs_total: i64,
    pub child_jobs_done: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScanRow> for Scan {
    type Error = anyhow::Error;

    fn try_from(row: ScanRow) -> Result<Self> {
        Ok(Scan {
            id: row.id,
            topic_id: row.topic_id,
            scan_type: row.scan_type.parse()?,
            status: row.status.parse()?,
            window: DateWindow::new(row.window_from, row.window_to),
            counters: ScanCounters {
                items_fetched: row.items_fetched,
                items_classified: row.items_classified,
                items_extracted: row.items_extracted,
                ideas_found: row.ideas_found,
            },
            checkpoint: row.checkpoint,
            pages_fetched: row.pages_fetched,
            child_jobs_total: row.child_jobs_total,
            child_jobs_done: row.child_jobs_done,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub scan_id: Uuid,
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub upvotes: i64,
    pub num_comments: i64,
    pub posted_at: Option<DateTime<Utc>>,
    pub replies: serde_json::Value,
    pub replies_fetched_at: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        // A malformed replies column degrades to no replies.
        let replies = serde_json::from_value(row.replies).unwrap_or_default();
        Item {
            id: row.id,
            topic_id: row.topic_id,
            scan_id: row.scan_id,
            source_id: row.source_id,
            title: row.title,
            body: row.body,
            url: row.url,
            author: row.author,
            subreddit: row.subreddit,
            upvotes: row.upvotes,
            num_comments: row.num_comments,
            posted_at: row.posted_at,
            replies,
            replies_fetched_at: row.replies_fetched_at,
            extracted_at: row.extracted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ClassificationRow {
    pub item_id: Uuid,
    pub scan_id: Uuid,
    pub primary_provider: Option<String>,
    pub primary_verdict: Option<String>,
    pub primary_confidence: Option<f64>,
    pub primary_category: Option<String>,
    pub primary_reasoning: Option<String>,
    pub primary_completed: bool,
    pub secondary_provider: Option<String>,
    pub secondary_verdict: Option<String>,
    pub secondary_confidence: Option<f64>,
    pub secondary_category: Option<String>,
    pub secondary_reasoning: Option<String>,
    pub secondary_completed: bool,
    pub combined_score: Option<f64>,
    pub final_decision: String,
    pub reason: Option<String>,
    pub classified_at: Option<DateTime<Utc>>,
}

impl TryFrom<ClassificationRow> for Classification {
    type Error = anyhow::Error;

    fn try_from(row: ClassificationRow) -> Result<Self> {
        Ok(Classification {
            item_id: row.item_id,
            scan_id: row.scan_id,
            primary: ModelSlot {
                provider: row.primary_provider,
                verdict: row.primary_verdict.as_deref().map(str::parse).transpose()?,
                confidence: row.primary_confidence,
                category: row.primary_category,
                reasoning: row.primary_reasoning,
                completed: row.primary_completed,
            },
            secondary: ModelSlot {
                provider: row.secondary_provider,
                verdict: row.secondary_verdict.as_deref().map(str::parse).transpose()?,
                confidence: row.secondary_confidence,
                category: row.secondary_category,
                reasoning: row.secondary_reasoning,
                completed: row.secondary_completed,
            },
            combined_score: row.combined_score,
            final_decision: row.final_decision.parse()?,
            reason: row.reason,
            classified_at: row.classified_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct IdeaRow {
    pub id: Uuid,
    pub item_id: Uuid,
    pub scan_id: Uuid,
    pub topic_id: Uuid,
    pub title: String,
    pub problem: String,
    pub solution: String,
    pub target_audience: String,
    pub market_demand: i32,
    pub pain_intensity: i32,
    pub competition: i32,
    pub feasibility: i32,
    pub monetization: i32,
    pub overall_score: i32,
    pub classification_status: String,
    pub starred: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<IdeaRow> for Idea {
    type Error = anyhow::Error;

    fn try_from(row: IdeaRow) -> Result<Self> {
        Ok(Idea {
            id: row.id,
            item_id: row.item_id,
            scan_id: row.scan_id,
            topic_id: row.topic_id,
            title: row.title,
            problem: row.problem,
            solution: row.solution,
            target_audience: row.target_audience,
            market_demand: row.market_demand,
            pain_intensity: row.pain_intensity,
            competition: row.competition,
            feasibility: row.feasibility,
            monetization: row.monetization,
            overall_score: row.overall_score,
            classification_status: row.classification_status.parse()?,
            starred: row.starred,
            created_at: row.created_at,
        })
    }
}

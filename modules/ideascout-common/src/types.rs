use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdeaScoutError;

// --- Scan lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Fetching,
    Classifying,
    Extracting,
    Completed,
    Failed,
}

impl ScanStatus {
    pub const ACTIVE: [ScanStatus; 4] = [
        ScanStatus::Pending,
        ScanStatus::Fetching,
        ScanStatus::Classifying,
        ScanStatus::Extracting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Fetching => "fetching",
            ScanStatus::Classifying => "classifying",
            ScanStatus::Extracting => "extracting",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Forward-only: each stage advances to the next, and any live status may fail.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, next) {
            (Pending, Fetching)
            | (Fetching, Classifying)
            | (Classifying, Extracting)
            | (Extracting, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Fetching => 25,
            ScanStatus::Classifying => 50,
            ScanStatus::Extracting => 75,
            ScanStatus::Completed => 100,
            ScanStatus::Failed => 0,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = IdeaScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "fetching" => Ok(ScanStatus::Fetching),
            "classifying" => Ok(ScanStatus::Classifying),
            "extracting" => Ok(ScanStatus::Extracting),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(IdeaScoutError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Initial,
    Rescan,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Initial => "initial",
            ScanType::Rescan => "rescan",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = IdeaScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(ScanType::Initial),
            "rescan" => Ok(ScanType::Rescan),
            other => Err(IdeaScoutError::Config(format!("unknown scan type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The `days` leading up to now.
    pub fn last_days(days: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - Duration::days(days),
            to,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }
}

// --- Topics and scans ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    pub subreddits: Vec<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn new(name: impl Into<String>, subreddits: Vec<String>, keywords: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subreddits,
            keywords,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounters {
    pub items_fetched: i64,
    pub items_classified: i64,
    pub items_extracted: i64,
    pub ideas_found: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub window: DateWindow,
    pub counters: ScanCounters,
    /// Opaque continuation cursor of the content source.
    pub checkpoint: Option<String>,
    /// Pages committed so far. A page is only written when this equals its number.
    pub pages_fetched: i32,
    pub child_jobs_total: i64,
    pub child_jobs_done: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    pub fn new(topic_id: Uuid, scan_type: ScanType, window: DateWindow) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic_id,
            scan_type,
            status: ScanStatus::Pending,
            window,
            counters: ScanCounters::default(),
            checkpoint: None,
            pages_fetched: 0,
            child_jobs_total: 0,
            child_jobs_done: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_view(&self) -> ScanStatusView {
        ScanStatusView {
            scan_id: self.id,
            topic_id: self.topic_id,
            scan_type: self.scan_type,
            status: self.status,
            progress_percent: self.status.progress_percent(),
            counters: self.counters,
            error: self.error_message.clone(),
        }
    }
}

/// What the UI layer sees of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatusView {
    pub scan_id: Uuid,
    pub topic_id: Uuid,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub progress_percent: u8,
    pub counters: ScanCounters,
    pub error: Option<String>,
}

// --- Items ---

/// A post as returned by the content source, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedItem {
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub upvotes: i64,
    pub num_comments: i64,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub topic_id: Uuid,
    /// Last scan that fetched this item.
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
    pub replies: Vec<String>,
    pub replies_fetched_at: Option<DateTime<Utc>>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn from_fetched(topic_id: Uuid, scan_id: Uuid, fetched: FetchedItem) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic_id,
            scan_id,
            source_id: fetched.source_id,
            title: fetched.title,
            body: fetched.body,
            url: fetched.url,
            author: fetched.author,
            subreddit: fetched.subreddit,
            upvotes: fetched.upvotes,
            num_comments: fetched.num_comments,
            posted_at: fetched.posted_at,
            replies: Vec::new(),
            replies_fetched_at: None,
            extracted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// --- Classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Keep,
    Skip,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Keep => "keep",
            Verdict::Skip => "skip",
        }
    }

    pub fn keep_flag(&self) -> f64 {
        match self {
            Verdict::Keep => 1.0,
            Verdict::Skip => 0.0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = IdeaScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Verdict::Keep),
            "skip" => Ok(Verdict::Skip),
            other => Err(IdeaScoutError::UnknownVerdict(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Keep,
    Discard,
    Borderline,
    Pending,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Keep => "keep",
            Decision::Discard => "discard",
            Decision::Borderline => "borderline",
            Decision::Pending => "pending",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Pending)
    }

    /// Keep and borderline items go on to extraction.
    pub fn is_extractable(&self) -> bool {
        matches!(self, Decision::Keep | Decision::Borderline)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = IdeaScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Decision::Keep),
            "discard" => Ok(Decision::Discard),
            "borderline" => Ok(Decision::Borderline),
            "pending" => Ok(Decision::Pending),
            other => Err(IdeaScoutError::Config(format!("unknown decision: {other}"))),
        }
    }
}

/// One model's answer to "is this post worth mining for ideas?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub category: String,
    pub reasoning: String,
}

/// One model slot of a classification record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSlot {
    pub provider: Option<String>,
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
    pub category: Option<String>,
    pub reasoning: Option<String>,
    pub completed: bool,
}

impl ModelSlot {
    pub fn answered(provider: &str, answer: &ModelVerdict) -> Self {
        Self {
            provider: Some(provider.to_string()),
            verdict: Some(answer.verdict),
            confidence: Some(answer.confidence),
            category: Some(answer.category.clone()),
            reasoning: Some(answer.reasoning.clone()),
            completed: true,
        }
    }

    pub fn failed(provider: &str, error: &str) -> Self {
        Self {
            provider: Some(provider.to_string()),
            reasoning: Some(format!("error: {error}")),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub item_id: Uuid,
    pub scan_id: Uuid,
    pub primary: ModelSlot,
    pub secondary: ModelSlot,
    pub combined_score: Option<f64>,
    pub final_decision: Decision,
    /// Set on synthetic records (gap-fill, total model failure).
    pub reason: Option<String>,
    pub classified_at: Option<DateTime<Utc>>,
}

impl Classification {
    pub fn pending(item_id: Uuid, scan_id: Uuid) -> Self {
        Self {
            item_id,
            scan_id,
            primary: ModelSlot::default(),
            secondary: ModelSlot::default(),
            combined_score: None,
            final_decision: Decision::Pending,
            reason: None,
            classified_at: None,
        }
    }

    /// A terminal discard that stands in for a classification the models never produced.
    pub fn synthetic_discard(item_id: Uuid, scan_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            combined_score: Some(0.0),
            final_decision: Decision::Discard,
            reason: Some(reason.into()),
            classified_at: Some(Utc::now()),
            ..Self::pending(item_id, scan_id)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_decision.is_terminal()
    }
}

// --- Ideas ---

/// An idea as produced by the extraction model, scores not yet normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedIdea {
    pub title: String,
    pub problem: String,
    pub solution: String,
    pub target_audience: String,
    pub market_demand: i32,
    pub pain_intensity: i32,
    pub competition: i32,
    pub feasibility: i32,
    pub monetization: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
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
    pub classification_status: Decision,
    pub starred: bool,
    pub created_at: DateTime<Utc>,
}

fn clamp_score(score: i32) -> i32 {
    score.clamp(1, 10)
}

impl Idea {
    pub fn from_extracted(item: &Item, scan_id: Uuid, status: Decision, raw: ExtractedIdea) -> Self {
        let scores = [
            clamp_score(raw.market_demand),
            clamp_score(raw.pain_intensity),
            clamp_score(raw.competition),
            clamp_score(raw.feasibility),
            clamp_score(raw.monetization),
        ];
        let overall = (scores.iter().sum::<i32>() as f64 / scores.len() as f64).round() as i32;

        Self {
            id: Uuid::new_v4(),
            item_id: item.id,
            scan_id,
            topic_id: item.topic_id,
            title: raw.title,
            problem: raw.problem,
            solution: raw.solution,
            target_audience: raw.target_audience,
            market_demand: scores[0],
            pain_intensity: scores[1],
            competition: scores[2],
            feasibility: scores[3],
            monetization: scores[4],
            overall_score: overall,
            classification_status: status,
            starred: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_follows_stage() {
        assert_eq!(ScanStatus::Pending.progress_percent(), 0);
        assert_eq!(ScanStatus::Fetching.progress_percent(), 25);
        assert_eq!(ScanStatus::Classifying.progress_percent(), 50);
        assert_eq!(ScanStatus::Extracting.progress_percent(), 75);
        assert_eq!(ScanStatus::Completed.progress_percent(), 100);
        assert_eq!(ScanStatus::Failed.progress_percent(), 0);
    }

    #[test]
    fn transitions_are_forward_only() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Fetching));
        assert!(ScanStatus::Extracting.can_transition_to(ScanStatus::Completed));
        assert!(ScanStatus::Classifying.can_transition_to(ScanStatus::Failed));

        assert!(!ScanStatus::Classifying.can_transition_to(ScanStatus::Fetching));
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Classifying));
        assert!(!ScanStatus::Completed.can_transition_to(ScanStatus::Failed));
        assert!(!ScanStatus::Failed.can_transition_to(ScanStatus::Failed));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in ScanStatus::ACTIVE {
            assert_eq!(status.as_str().parse::<ScanStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn unknown_verdict_is_rejected() {
        assert_eq!(" Keep ".parse::<Verdict>().unwrap(), Verdict::Keep);
        assert!(matches!(
            "maybe".parse::<Verdict>(),
            Err(IdeaScoutError::UnknownVerdict(_))
        ));
    }

    #[test]
    fn synthetic_discard_is_terminal() {
        let c = Classification::synthetic_discard(Uuid::new_v4(), Uuid::new_v4(), "gap");
        assert!(c.is_terminal());
        assert_eq!(c.final_decision, Decision::Discard);
        assert_eq!(c.combined_score, Some(0.0));
        assert!(c.classified_at.is_some());
    }

    #[test]
    fn idea_scores_are_clamped_and_averaged() {
        let item = Item::from_fetched(
            Uuid::new_v4(),
            Uuid::new_v4(),
            FetchedItem {
                source_id: "abc".into(),
                title: "t".into(),
                body: "b".into(),
                url: None,
                author: None,
                subreddit: None,
                upvotes: 0,
                num_comments: 0,
                posted_at: None,
            },
        );
        let idea = Idea::from_extracted(
            &item,
            item.scan_id,
            Decision::Keep,
            ExtractedIdea {
                title: "Invoice chaser".into(),
                problem: "p".into(),
                solution: "s".into(),
                target_audience: "freelancers".into(),
                market_demand: 14,
                pain_intensity: 8,
                competition: 0,
                feasibility: 7,
                monetization: 6,
            },
        );
        assert_eq!(idea.market_demand, 10);
        assert_eq!(idea.competition, 1);
        // (10 + 8 + 1 + 7 + 6) / 5 = 6.4
        assert_eq!(idea.overall_score, 6);
        assert_eq!(idea.topic_id, item.topic_id);
    }
}

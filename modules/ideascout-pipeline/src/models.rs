//! Language-model collaborators.
//!
//! The pipeline only sees [`ModelClient`]. Which concrete provider answers is
//! a configuration choice resolved once in [`ModelProvider::from_config`].

use std::time::Duration;

use ai_client::{AiError, Claude, OpenAi};
use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use ideascout_common::{
    AppConfig, ExtractedIdea, Item, ModelVerdict, ProviderConfig, ProviderKind, Topic, Verdict,
};

/// Longest body or reply excerpt sent to a model, in bytes.
const MAX_BODY_BYTES: usize = 4_000;
const MAX_REPLY_BYTES: usize = 500;

/// Per-request ceiling; an expired call is a transient timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub topic: String,
    pub keywords: Vec<String>,
    pub title: String,
    pub body: String,
    pub subreddit: Option<String>,
    pub upvotes: i64,
    pub num_comments: i64,
}

impl ClassifyRequest {
    pub fn new(topic: &Topic, item: &Item) -> Self {
        Self {
            topic: topic.name.clone(),
            keywords: topic.keywords.clone(),
            title: item.title.clone(),
            body: ai_client::truncate_to_char_boundary(&item.body, MAX_BODY_BYTES).to_string(),
            subreddit: item.subreddit.clone(),
            upvotes: item.upvotes,
            num_comments: item.num_comments,
        }
    }

    fn prompt(&self) -> String {
        let mut prompt = format!("Topic: {}\n", self.topic);
        if !self.keywords.is_empty() {
            prompt.push_str(&format!("Keywords: {}\n", self.keywords.join(", ")));
        }
        if let Some(ref sub) = self.subreddit {
            prompt.push_str(&format!("Subreddit: r/{sub}\n"));
        }
        prompt.push_str(&format!(
            "Engagement: {} upvotes, {} comments\n\nTitle: {}\n\n{}",
            self.upvotes, self.num_comments, self.title, self.body
        ));
        prompt
    }
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub topic: String,
    pub title: String,
    pub body: String,
    pub replies: Vec<String>,
    pub max_ideas: usize,
}

impl ExtractRequest {
    pub fn new(topic: &Topic, item: &Item, max_ideas: usize) -> Self {
        Self {
            topic: topic.name.clone(),
            title: item.title.clone(),
            body: ai_client::truncate_to_char_boundary(&item.body, MAX_BODY_BYTES).to_string(),
            replies: item
                .replies
                .iter()
                .map(|r| ai_client::truncate_to_char_boundary(r, MAX_REPLY_BYTES).to_string())
                .collect(),
            max_ideas,
        }
    }

    fn prompt(&self) -> String {
        let mut prompt = format!(
            "Topic: {}\n\nTitle: {}\n\n{}\n",
            self.topic, self.title, self.body
        );
        if !self.replies.is_empty() {
            prompt.push_str("\nReplies:\n");
            for reply in &self.replies {
                prompt.push_str(&format!("- {reply}\n"));
            }
        }
        prompt.push_str(&format!("\nReturn at most {} ideas.", self.max_ideas));
        prompt
    }
}

const CLASSIFY_SYSTEM: &str = "You screen forum posts for a product researcher. \
Decide whether the post describes a real, recurring problem or unmet need that someone \
could build a business around. Answer \"keep\" for posts worth mining for ideas and \
\"skip\" for everything else (memes, self-promotion, news, vague venting). \
Give a confidence between 0 and 1, a short category and one sentence of reasoning.";

const EXTRACT_SYSTEM: &str = "You turn forum posts into concrete business ideas. \
For each distinct idea give a short title, the problem, a proposed solution and the \
target audience, and score it 1-10 on market demand, pain intensity, competition \
(10 = little competition), feasibility and monetization. \
Return an empty list when the post holds no actionable idea.";

// =============================================================================
// Wire types
// =============================================================================

/// Raw classify answer. The verdict stays a string so an unexpected value
/// surfaces as a parse failure instead of a silent default.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClassifyReply {
    /// Either "keep" or "skip".
    pub verdict: String,
    pub confidence: f64,
    pub category: String,
    pub reasoning: String,
}

impl TryFrom<ClassifyReply> for ModelVerdict {
    type Error = AiError;

    fn try_from(reply: ClassifyReply) -> Result<Self, Self::Error> {
        let verdict: Verdict = reply
            .verdict
            .parse()
            .map_err(|e: ideascout_common::IdeaScoutError| AiError::Parse(e.to_string()))?;
        Ok(ModelVerdict {
            verdict,
            confidence: reply.confidence,
            category: reply.category,
            reasoning: reply.reasoning,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractReply {
    pub ideas: Vec<ExtractedIdea>,
}

// =============================================================================
// ModelClient
// =============================================================================

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider label stored on classification slots, e.g. `claude:claude-3-5-haiku-latest`.
    fn name(&self) -> &str;

    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelVerdict, AiError>;

    async fn extract(&self, request: &ExtractRequest) -> Result<Vec<ExtractedIdea>, AiError>;
}

/// The configured concrete providers.
pub enum ModelProvider {
    Claude { name: String, client: Claude },
    OpenAi { name: String, client: OpenAi },
}

impl ModelProvider {
    pub fn from_config(provider: &ProviderConfig, config: &AppConfig) -> Result<Self> {
        let name = format!("{}:{}", provider.provider.as_str(), provider.model);
        match provider.provider {
            ProviderKind::Claude => {
                let key = config
                    .anthropic_api_key
                    .as_deref()
                    .context("ANTHROPIC_API_KEY is required for a claude provider")?;
                Ok(Self::Claude {
                    name,
                    client: Claude::new(key, &provider.model).with_timeout(REQUEST_TIMEOUT),
                })
            }
            ProviderKind::OpenAi => {
                let key = config
                    .openai_api_key
                    .as_deref()
                    .context("OPENAI_API_KEY is required for an openai provider")?;
                Ok(Self::OpenAi {
                    name,
                    client: OpenAi::new(key, &provider.model).with_timeout(REQUEST_TIMEOUT),
                })
            }
        }
    }

    async fn structured<T: ai_client::StructuredOutput + Send>(
        &self,
        system: &str,
        user: String,
    ) -> Result<T, AiError> {
        match self {
            Self::Claude { client, .. } => client.structured(system, user).await,
            Self::OpenAi { client, .. } => client.structured(system, user).await,
        }
    }
}

#[async_trait]
impl ModelClient for ModelProvider {
    fn name(&self) -> &str {
        match self {
            Self::Claude { name, .. } | Self::OpenAi { name, .. } => name,
        }
    }

    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelVerdict, AiError> {
        let reply: ClassifyReply = self.structured(CLASSIFY_SYSTEM, request.prompt()).await?;
        reply.try_into()
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<Vec<ExtractedIdea>, AiError> {
        let reply: ExtractReply = self.structured(EXTRACT_SYSTEM, request.prompt()).await?;
        Ok(reply.ideas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item() -> Item {
        let mut item = Item::from_fetched(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ideascout_common::FetchedItem {
                source_id: "t3_1".into(),
                title: "Invoicing is a nightmare".into(),
                body: "x".repeat(10_000),
                url: None,
                author: None,
                subreddit: Some("freelance".into()),
                upvotes: 12,
                num_comments: 4,
                posted_at: None,
            },
        );
        item.replies = vec!["same here".into()];
        item
    }

    #[test]
    fn unknown_verdict_is_a_parse_error() {
        let reply = ClassifyReply {
            verdict: "maybe".into(),
            confidence: 0.5,
            category: "other".into(),
            reasoning: String::new(),
        };
        let err = ModelVerdict::try_from(reply).unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn verdict_parsing_tolerates_case_and_whitespace() {
        let reply = ClassifyReply {
            verdict: " Keep ".into(),
            confidence: 0.9,
            category: "pain point".into(),
            reasoning: "clear need".into(),
        };
        assert_eq!(ModelVerdict::try_from(reply).unwrap().verdict, Verdict::Keep);
    }

    #[test]
    fn requests_truncate_long_bodies() {
        let topic = Topic::new("invoicing", vec![], vec!["invoice".into()]);
        let classify = ClassifyRequest::new(&topic, &item());
        assert_eq!(classify.body.len(), MAX_BODY_BYTES);
        assert!(classify.prompt().contains("Keywords: invoice"));

        let extract = ExtractRequest::new(&topic, &item(), 3);
        assert!(extract.prompt().contains("- same here"));
        assert!(extract.prompt().ends_with("at most 3 ideas."));
    }
}

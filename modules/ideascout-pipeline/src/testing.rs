// Test mocks for the pipeline.
//
// Two mocks matching the two external trait boundaries:
// - MockSource (ContentSource): pre-baked pages chained by index cursors
// - ScriptedModel (ModelClient): per-title verdicts, ideas and failures
//
// The store and queue need no mocks: MemoryScanStore and MemoryJobQueue carry
// the same guard semantics as the Postgres implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_client::AiError;
use async_trait::async_trait;

use ideascout_common::{DateWindow, ExtractedIdea, FetchedItem, Item, ModelVerdict, Topic, Verdict};
use ideascout_store::{JobQueue, ScanStore};

use crate::deps::PipelineDeps;
use crate::models::{ClassifyRequest, ExtractRequest, ModelClient};
use crate::retry::RetryPolicy;
use crate::traits::{ContentSource, SourceError, SourcePage};

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Serves `pages` in order. The cursor is the index of the next page.
/// Builder pattern: `.page()`, `.replies()`, `.failing()`.
#[derive(Default)]
pub struct MockSource {
    pages: Vec<Vec<FetchedItem>>,
    replies: HashMap<String, Vec<String>>,
    failure: Option<SourceError>,
    fetch_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, items: Vec<FetchedItem>) -> Self {
        self.pages.push(items);
        self
    }

    pub fn replies(mut self, source_id: &str, replies: &[&str]) -> Self {
        self.replies.insert(
            source_id.to_string(),
            replies.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// Every fetch fails with `error`.
    pub fn failing(mut self, error: SourceError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch(
        &self,
        _topic: &Topic,
        _window: &DateWindow,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref err) = self.failure {
            return Err(err.clone());
        }

        let index = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| SourceError::Permanent(format!("MockSource: bad cursor {raw}: {e}")))?,
            None => 0,
        };
        let items = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(SourcePage { items, next_cursor })
    }

    async fn fetch_replies(&self, item: &Item) -> Result<Vec<String>, SourceError> {
        Ok(self.replies.get(&item.source_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Answers keyed by item title. Unscripted titles classify as a permanent
/// error and extract to no ideas.
pub struct ScriptedModel {
    name: String,
    verdicts: HashMap<String, Result<ModelVerdict, AiError>>,
    ideas: HashMap<String, Result<Vec<ExtractedIdea>, AiError>>,
    /// Titles whose next N calls time out before the scripted answer applies.
    flaky: Mutex<HashMap<String, usize>>,
    classify_calls: AtomicUsize,
    extract_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            verdicts: HashMap::new(),
            ideas: HashMap::new(),
            flaky: Mutex::new(HashMap::new()),
            classify_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    pub fn verdict(mut self, title: &str, verdict: Verdict, confidence: f64) -> Self {
        self.verdicts.insert(
            title.to_string(),
            Ok(ModelVerdict {
                verdict,
                confidence,
                category: "test".into(),
                reasoning: format!("scripted {}", verdict.as_str()),
            }),
        );
        self
    }

    pub fn fail(mut self, title: &str, error: AiError) -> Self {
        self.verdicts.insert(title.to_string(), Err(error));
        self
    }

    pub fn ideas(mut self, title: &str, ideas: Vec<ExtractedIdea>) -> Self {
        self.ideas.insert(title.to_string(), Ok(ideas));
        self
    }

    pub fn fail_extract(mut self, title: &str, error: AiError) -> Self {
        self.ideas.insert(title.to_string(), Err(error));
        self
    }

    /// The next `times` calls for `title` (classify or extract) time out.
    pub fn flaky(self, title: &str, times: usize) -> Self {
        self.flaky.lock().unwrap().insert(title.to_string(), times);
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    fn take_flake(&self, title: &str) -> Option<AiError> {
        let mut flaky = self.flaky.lock().unwrap();
        let remaining = flaky.get_mut(title)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(AiError::Timeout(format!("ScriptedModel: flaky {title}")))
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelVerdict, AiError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_flake(&request.title) {
            return Err(err);
        }
        self.verdicts.get(&request.title).cloned().unwrap_or_else(|| {
            Err(AiError::InvalidRequest {
                status: 400,
                message: format!("ScriptedModel: no verdict for {}", request.title),
            })
        })
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<Vec<ExtractedIdea>, AiError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_flake(&request.title) {
            return Err(err);
        }
        self.ideas.get(&request.title).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn post(source_id: &str, title: &str) -> FetchedItem {
    FetchedItem {
        source_id: source_id.to_string(),
        title: title.to_string(),
        body: format!("{title}, in more words"),
        url: Some(format!("https://www.reddit.com/r/test/comments/{source_id}")),
        author: Some("poster".into()),
        subreddit: Some("test".into()),
        upvotes: 10,
        num_comments: 2,
        posted_at: None,
    }
}

pub fn idea(title: &str) -> ExtractedIdea {
    ExtractedIdea {
        title: title.to_string(),
        problem: "manual work".into(),
        solution: "automate it".into(),
        target_audience: "freelancers".into(),
        market_demand: 8,
        pain_intensity: 7,
        competition: 5,
        feasibility: 9,
        monetization: 6,
    }
}

/// Deps over the given collaborators with immediate retries.
pub fn deps(
    store: Arc<dyn ScanStore>,
    queue: Arc<dyn JobQueue>,
    source: Arc<dyn ContentSource>,
    classifiers: Vec<Arc<dyn ModelClient>>,
    extractor: Arc<dyn ModelClient>,
) -> PipelineDeps {
    PipelineDeps::builder()
        .store(store)
        .queue(queue)
        .source(source)
        .classifiers(classifiers)
        .extractor(extractor)
        .retry(RetryPolicy::immediate(3))
        .build()
}

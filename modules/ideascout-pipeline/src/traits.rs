// Trait abstraction for the content-fetch collaborator.
//
// ContentSource hides the forum client behind a cursor-paged interface so the
// fetch stage can be driven by MockSource in tests: no network, no Apify.

use async_trait::async_trait;
use thiserror::Error;

use ideascout_common::{DateWindow, FetchedItem, Item, Topic};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network trouble, throttling, upstream 5xx. Worth another attempt.
    #[error("Transient source error: {0}")]
    Transient(String),

    #[error("Source error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

impl From<apify_client::ApifyError> for SourceError {
    fn from(err: apify_client::ApifyError) -> Self {
        if err.is_transient() {
            SourceError::Transient(err.to_string())
        } else {
            SourceError::Permanent(err.to_string())
        }
    }
}

/// One page of results and where to continue from.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub items: Vec<FetchedItem>,
    /// `None` once the source is exhausted.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the page after `cursor` (`None` starts from the beginning).
    async fn fetch(
        &self,
        topic: &Topic,
        window: &DateWindow,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError>;

    /// Reply bodies for one fetched item.
    async fn fetch_replies(&self, item: &Item) -> Result<Vec<String>, SourceError>;
}

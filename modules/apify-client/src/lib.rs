pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{RedditPost, RedditScraperInput, RunData, StartUrl};

use serde::de::DeserializeOwned;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor for trudax/reddit-scraper-lite (`username~actor` addressing).
const REDDIT_SCRAPER: &str = "trudax~reddit-scraper-lite";

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Start a Reddit scraper run. Returns immediately with run metadata.
    pub async fn start_reddit_run(&self, input: &RedditScraperInput) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, REDDIT_SCRAPER);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApifyError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed(api_resp.data.status));
                }
                _ => {
                    tracing::debug!(
                        run_id,
                        status = %api_resp.data.status,
                        "Run still in progress"
                    );
                    continue;
                }
            }
        }
    }

    /// Fetch one page of dataset items. An empty page means the dataset is exhausted.
    pub async fn get_dataset_page<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<T>> {
        let url = format!(
            "{}/datasets/{}/items?format=json&clean=true&offset={}&limit={}",
            self.base_url, dataset_id, offset, limit
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let items: Vec<T> = resp.json().await?;
        Ok(items)
    }

    /// Run a post search to completion and return the dataset id to page through.
    pub async fn run_reddit_search(&self, input: &RedditScraperInput) -> Result<String> {
        tracing::info!(
            searches = ?input.searches,
            community = ?input.search_community_name,
            max_items = input.max_items,
            "Starting Reddit search"
        );

        let run = self.start_reddit_run(input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed"
        );

        Ok(completed.default_dataset_id)
    }

    /// Scrape the comments of one post end-to-end: start run, poll, fetch results.
    pub async fn scrape_reddit_comments(
        &self,
        post_url: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>> {
        let run = self
            .start_reddit_run(&RedditScraperInput::comments(post_url, limit))
            .await?;
        let completed = self.wait_for_run(&run.id).await?;

        let records: Vec<RedditPost> = self
            .get_dataset_page(&completed.default_dataset_id, 0, limit + 1)
            .await?;
        let comments: Vec<RedditPost> =
            records.into_iter().filter(RedditPost::is_comment).collect();
        tracing::debug!(post_url, count = comments.len(), "Fetched Reddit comments");

        Ok(comments)
    }
}

//! Reddit via Apify, behind [`ContentSource`].
//!
//! The first fetch of a scan runs the scraper actor to completion; later
//! pages walk its dataset by offset. The cursor carries both, so a fetch job
//! redelivered after a crash resumes against the same dataset.

use apify_client::{ApifyClient, RedditPost, RedditScraperInput, StartUrl};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ideascout_common::file_config::FetchConfig;
use ideascout_common::{DateWindow, FetchedItem, Item, Topic};

use crate::traits::{ContentSource, SourceError, SourcePage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cursor {
    dataset_id: String,
    offset: u64,
}

impl Cursor {
    fn decode(raw: &str) -> Result<Self, SourceError> {
        serde_json::from_str(raw)
            .map_err(|e| SourceError::Permanent(format!("Malformed fetch checkpoint: {e}")))
    }

    fn encode(&self) -> String {
        // A two-field struct of plain strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct ApifyRedditSource {
    client: ApifyClient,
    page_size: u32,
    max_items: u32,
    max_replies: u32,
}

impl ApifyRedditSource {
    pub fn new(client: ApifyClient, config: &FetchConfig) -> Self {
        Self {
            client,
            page_size: config.page_size.max(1),
            max_items: config.max_items,
            max_replies: config.max_replies,
        }
    }

    fn search_input(&self, topic: &Topic, window: &DateWindow) -> RedditScraperInput {
        let mut input = RedditScraperInput::posts(self.max_items);
        input.time = Some(time_filter(window).to_string());

        if topic.keywords.is_empty() {
            // No search terms: read the newest posts of each community.
            input.start_urls = topic
                .subreddits
                .iter()
                .map(|sub| StartUrl {
                    url: format!("https://www.reddit.com/r/{sub}/new/"),
                })
                .collect();
        } else {
            input.searches = topic.keywords.clone();
            if let [only] = topic.subreddits.as_slice() {
                input.search_community_name = Some(only.clone());
            }
        }
        input
    }
}

/// Smallest Reddit time filter that still covers the window.
fn time_filter(window: &DateWindow) -> &'static str {
    let days = (chrono::Utc::now() - window.from).num_days();
    match days {
        d if d < 1 => "day",
        d if d < 7 => "week",
        d if d < 31 => "month",
        d if d < 366 => "year",
        _ => "all",
    }
}

fn to_fetched(post: RedditPost) -> Option<FetchedItem> {
    let source_id = post.source_id()?.to_string();
    Some(FetchedItem {
        source_id,
        title: post.title.unwrap_or_default(),
        body: post.body.unwrap_or_default(),
        url: post.url,
        author: post.username,
        subreddit: post.community_name,
        upvotes: post.up_votes.unwrap_or(0),
        num_comments: post.number_of_comments.unwrap_or(0),
        posted_at: post.created_at,
    })
}

#[async_trait]
impl ContentSource for ApifyRedditSource {
    async fn fetch(
        &self,
        topic: &Topic,
        window: &DateWindow,
        cursor: Option<&str>,
    ) -> Result<SourcePage, SourceError> {
        let cursor = match cursor {
            Some(raw) => Cursor::decode(raw)?,
            None => {
                let input = self.search_input(topic, window);
                let dataset_id = self.client.run_reddit_search(&input).await?;
                info!(topic = %topic.name, dataset_id = %dataset_id, "Source run finished");
                Cursor {
                    dataset_id,
                    offset: 0,
                }
            }
        };

        let records: Vec<RedditPost> = self
            .client
            .get_dataset_page(&cursor.dataset_id, cursor.offset, self.page_size)
            .await?;
        let returned = records.len() as u64;

        let items: Vec<FetchedItem> = records
            .into_iter()
            .filter(RedditPost::is_post)
            .filter(|p| p.created_at.map_or(true, |at| window.contains(at)))
            .filter_map(to_fetched)
            .collect();

        debug!(
            dataset_id = %cursor.dataset_id,
            offset = cursor.offset,
            returned,
            kept = items.len(),
            "Fetched dataset page"
        );

        // A short page means the dataset is exhausted.
        let next_cursor = (returned >= self.page_size as u64).then(|| {
            Cursor {
                dataset_id: cursor.dataset_id.clone(),
                offset: cursor.offset + returned,
            }
            .encode()
        });

        Ok(SourcePage { items, next_cursor })
    }

    async fn fetch_replies(&self, item: &Item) -> Result<Vec<String>, SourceError> {
        let Some(url) = item.url.as_deref() else {
            return Ok(Vec::new());
        };
        let comments = self.client.scrape_reddit_comments(url, self.max_replies).await?;
        Ok(comments
            .into_iter()
            .filter_map(|c| c.body)
            .filter(|b| !b.trim().is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ApifyRedditSource {
        ApifyRedditSource::new(ApifyClient::new("token".into()), &FetchConfig::default())
    }

    #[test]
    fn cursor_survives_encoding() {
        let cursor = Cursor {
            dataset_id: "abc".into(),
            offset: 200,
        };
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn garbage_cursor_is_permanent() {
        let err = Cursor::decode("not json").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn keyword_topics_search_within_a_single_community() {
        let topic = Topic::new("invoicing", vec!["freelance".into()], vec!["invoice".into()]);
        let input = source().search_input(&topic, &DateWindow::last_days(7));
        assert_eq!(input.searches, vec!["invoice".to_string()]);
        assert_eq!(input.search_community_name.as_deref(), Some("freelance"));
        assert_eq!(input.time.as_deref(), Some("month"));
    }

    #[test]
    fn keywordless_topics_read_community_feeds() {
        let topic = Topic::new("saas", vec!["saas".into(), "startups".into()], vec![]);
        let input = source().search_input(&topic, &DateWindow::last_days(30));
        assert!(input.searches.is_empty());
        assert_eq!(input.start_urls.len(), 2);
        assert_eq!(input.start_urls[1].url, "https://www.reddit.com/r/startups/new/");
    }
}

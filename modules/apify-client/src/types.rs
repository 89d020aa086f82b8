use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct StartUrl {
    pub url: String,
}

/// Input for the trudax/reddit-scraper-lite actor.
#[derive(Debug, Clone, Serialize)]
pub struct RedditScraperInput {
    #[serde(rename = "startUrls", skip_serializing_if = "Vec::is_empty")]
    pub start_urls: Vec<StartUrl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub searches: Vec<String>,
    #[serde(rename = "searchCommunityName", skip_serializing_if = "Option::is_none")]
    pub search_community_name: Option<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    #[serde(rename = "maxComments")]
    pub max_comments: u32,
    #[serde(rename = "skipComments")]
    pub skip_comments: bool,
    pub sort: String,
    /// Reddit's search time filter: hour, day, week, month, year, all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl RedditScraperInput {
    /// Posts only, newest first.
    pub fn posts(max_items: u32) -> Self {
        Self {
            start_urls: Vec::new(),
            searches: Vec::new(),
            search_community_name: None,
            max_items,
            max_comments: 0,
            skip_comments: true,
            sort: "new".to_string(),
            time: None,
        }
    }

    /// Comments of a single post.
    pub fn comments(post_url: &str, max_comments: u32) -> Self {
        Self {
            start_urls: vec![StartUrl {
                url: post_url.to_string(),
            }],
            searches: Vec::new(),
            search_community_name: None,
            max_items: max_comments + 1,
            max_comments,
            skip_comments: false,
            sort: "top".to_string(),
            time: None,
        }
    }
}

/// A single Reddit record from the Apify dataset (post, comment, or community).
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: Option<String>,
    #[serde(rename = "parsedId")]
    pub parsed_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "communityName")]
    pub community_name: Option<String>,
    #[serde(rename = "upVotes")]
    pub up_votes: Option<i64>,
    #[serde(rename = "numberOfComments")]
    pub number_of_comments: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    /// Apify returns "community", "post", or "comment". Used to filter out non-posts.
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
}

impl RedditPost {
    pub fn is_post(&self) -> bool {
        self.data_type.as_deref() == Some("post")
    }

    pub fn is_comment(&self) -> bool {
        self.data_type.as_deref() == Some("comment")
    }

    /// Stable identifier: Reddit's own id, falling back to the permalink.
    pub fn source_id(&self) -> Option<&str> {
        self.parsed_id
            .as_deref()
            .or(self.id.as_deref())
            .or(self.url.as_deref())
    }
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_input_skips_comments() {
        let input = RedditScraperInput::posts(50);
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body["maxItems"], 50);
        assert_eq!(body["skipComments"], true);
        assert!(body.get("startUrls").is_none());
    }

    #[test]
    fn dataset_record_identity() {
        let post: RedditPost = serde_json::from_value(serde_json::json!({
            "id": "t3_abc",
            "parsedId": "abc",
            "url": "https://www.reddit.com/r/saas/comments/abc/x/",
            "dataType": "post",
            "upVotes": 12
        }))
        .unwrap();
        assert!(post.is_post());
        assert_eq!(post.source_id(), Some("abc"));
        assert_eq!(post.up_votes, Some(12));
    }
}

//! Client for the external post search collaborator: a Twitter-compatible
//! search API that accepts a query string and a pagination cursor.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::domain::post::{NewPost, NewPostImage, NewPostUrl, NewPostVideo};
use crate::services::error::PipelineError;

const SEARCH_RETRY_ATTEMPTS: u32 = 4;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(750);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PostSourceClient {
    auth_key: String,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    posts: Vec<RawPost>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub canonical_id: Option<String>,
    pub author_handle: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub quoted_text: Option<String>,
    #[serde(default)]
    pub impressions: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub retweets: i64,
    #[serde(default)]
    pub quotes: i64,
    #[serde(default)]
    pub bookmarks: i64,
    #[serde(default)]
    pub replies: i64,
    #[serde(default)]
    pub is_retweet: bool,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_quote: bool,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub videos: Vec<RawVideo>,
}

#[derive(Debug, Deserialize)]
pub struct RawVideo {
    pub resolution_bucket: String,
    pub media_url: String,
}

pub struct SearchPage {
    pub posts: Vec<RawPost>,
    pub next_cursor: Option<String>,
}

impl PostSourceClient {
    pub fn new(auth_key: &str, base_url: &str) -> Self {
        Self {
            auth_key: auth_key.to_string(),
            http: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    /// One page of a search query. Retries up to `SEARCH_RETRY_ATTEMPTS + 1`
    /// times total with capped exponential backoff before surfacing a
    /// transient error to the caller's batch-skip logic. A `Retry-After`
    /// header on a 429/503 response takes priority over the backoff delay.
    pub async fn search(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage, PipelineError> {
        let mut last_err = None;
        for attempt in 0..=SEARCH_RETRY_ATTEMPTS {
            match self.search_once(query, cursor).await {
                Ok(page) => return Ok(page),
                Err((e, retry_after)) => {
                    last_err = Some(e);
                    if attempt < SEARCH_RETRY_ATTEMPTS {
                        let backoff = BASE_RETRY_DELAY * 2u32.pow(attempt);
                        let delay = retry_after.map(|d| d.min(MAX_RETRY_AFTER)).unwrap_or(backoff);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::Transient("search failed with no error detail".to_string())))
    }

    async fn search_once(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage, (PipelineError, Option<Duration>)> {
        let mut request = self
            .http
            .get(format!("{}/search", self.base_url))
            .bearer_auth(&self.auth_key)
            .query(&[("q", query)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await.map_err(|e| (PipelineError::from(e), None))?;
        let retry_after = parse_retry_after(response.headers());
        let response = response.error_for_status().map_err(|e| (PipelineError::from(e), retry_after))?;
        let parsed: SearchResponse = response.json().await.map_err(|e| (PipelineError::from(e), None))?;
        Ok(SearchPage {
            posts: parsed.posts,
            next_cursor: parsed.next_cursor,
        })
    }
}

/// Parses a `Retry-After` header value given as either a delay in seconds
/// or an HTTP-date; only the seconds form is honored, a date form is
/// ignored in favor of our own backoff.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn build_author_batch_query(handles: &[String]) -> String {
    handles.iter().map(|h| format!("from:{h}")).collect::<Vec<_>>().join(" OR ")
}

pub fn to_new_post(raw: &RawPost) -> NewPost {
    let canonical_tweet_id = raw.canonical_id.clone().unwrap_or_else(|| raw.id.clone());
    NewPost {
        external_id: raw.id.clone(),
        canonical_tweet_id,
        author_handle: raw.author_handle.clone(),
        created_at: raw.created_at,
        raw_text: raw.text.clone(),
        quoted_text: raw.quoted_text.clone(),
        impressions: raw.impressions,
        likes: raw.likes,
        retweets: raw.retweets,
        quotes: raw.quotes,
        bookmarks: raw.bookmarks,
        replies: raw.replies,
        is_retweet: raw.is_retweet,
        is_reply: raw.is_reply,
        is_quote: raw.is_quote,
    }
}

pub fn to_new_urls(raw: &RawPost) -> Vec<NewPostUrl> {
    raw.urls.iter().map(|u| NewPostUrl { url: u.clone() }).collect()
}

pub fn to_new_images(raw: &RawPost) -> Vec<NewPostImage> {
    raw.image_urls.iter().map(|u| NewPostImage { image_url: u.clone() }).collect()
}

pub fn to_new_videos(raw: &RawPost) -> Vec<NewPostVideo> {
    raw.videos
        .iter()
        .map(|v| NewPostVideo {
            resolution_bucket: v.resolution_bucket.clone(),
            media_url: v.media_url.clone(),
        })
        .collect()
}

/// Dedupe a batch of fetched posts by external id, keeping the first
/// occurrence — pagination or overlapping author batches can return the
/// same post twice within one ingest run.
pub fn dedupe_by_external_id(posts: Vec<RawPost>) -> Vec<RawPost> {
    let mut seen = std::collections::HashSet::new();
    posts.into_iter().filter(|p| seen.insert(p.id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_batch_query_unions_handles_with_or() {
        let handles = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(build_author_batch_query(&handles), "from:alice OR from:bob");
    }

    #[test]
    fn dedupe_keeps_first_occurrence_of_each_external_id() {
        let posts = vec![
            RawPost {
                id: "1".to_string(),
                canonical_id: None,
                author_handle: "alice".to_string(),
                created_at: Utc::now(),
                text: "first".to_string(),
                quoted_text: None,
                impressions: 0,
                likes: 0,
                retweets: 0,
                quotes: 0,
                bookmarks: 0,
                replies: 0,
                is_retweet: false,
                is_reply: false,
                is_quote: false,
                urls: vec![],
                image_urls: vec![],
                videos: vec![],
            },
            RawPost {
                id: "1".to_string(),
                canonical_id: None,
                author_handle: "alice".to_string(),
                created_at: Utc::now(),
                text: "duplicate".to_string(),
                quoted_text: None,
                impressions: 0,
                likes: 0,
                retweets: 0,
                quotes: 0,
                bookmarks: 0,
                replies: 0,
                is_retweet: false,
                is_reply: false,
                is_quote: false,
                urls: vec![],
                image_urls: vec![],
                videos: vec![],
            },
        ];
        let deduped = dedupe_by_external_id(posts);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].text, "first");
    }
}

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{fetch_error, StoreAdapter};
use crate::error::IngestError;
use crate::models::{RawReview, APP_STORE};

const ITUNES_BASE_URL: &str = "https://itunes.apple.com";

/// Apple's public customer-review RSS feed, newest first.
pub struct AppStoreAdapter {
    client: reqwest::Client,
    country: String,
    base_url: String,
}

impl AppStoreAdapter {
    pub fn new(client: reqwest::Client, country: impl Into<String>) -> Self {
        Self { client, country: country.into(), base_url: ITUNES_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Feed pages are 1-based; page index 0 is the newest page.
    fn reviews_url(&self, app_id: &str, page: u32) -> String {
        format!(
            "{}/{}/rss/customerreviews/page={}/id={}/sortBy=mostRecent/json",
            self.base_url,
            self.country,
            page + 1,
            urlencoding::encode(app_id)
        )
    }

    fn lookup_url(&self, app_id: &str) -> String {
        format!(
            "{}/lookup?id={}&country={}",
            self.base_url,
            urlencoding::encode(app_id),
            self.country
        )
    }
}

#[async_trait]
impl StoreAdapter for AppStoreAdapter {
    fn store_name(&self) -> &str {
        APP_STORE
    }

    async fn reviews(&self, app_id: &str, page: u32) -> Result<Vec<RawReview>, IngestError> {
        let url = self.reviews_url(app_id, page);
        let resp = self.client.get(&url).send().await.map_err(|e| fetch_error(&url, e))?;
        let status = resp.status();
        // Apple answers past-the-end pages with 400/404 rather than an empty feed
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            debug!("app store feed {} returned {}; treating as empty page", url, status);
            return Ok(vec![]);
        }
        if !status.is_success() {
            return Err(IngestError::SourceFetch(format!("{}: http {}", url, status)));
        }
        let body: Value = resp.json().await.map_err(|e| fetch_error(&url, e))?;
        Ok(parse_feed_entries(&body))
    }

    async fn current_version(&self, app_id: &str) -> Result<String, IngestError> {
        let url = self.lookup_url(app_id);
        let resp = self.client.get(&url).send().await.map_err(|e| fetch_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(IngestError::SourceFetch(format!("{}: http {}", url, resp.status())));
        }
        let body: Value = resp.json().await.map_err(|e| fetch_error(&url, e))?;
        body["results"]
            .get(0)
            .and_then(|r| r["version"].as_str())
            .map(str::to_string)
            .ok_or_else(|| IngestError::SourceFetch(format!("no version for app {} in lookup", app_id)))
    }
}

fn label(entry: &Value, key: &str) -> Option<String> {
    entry[key]["label"].as_str().map(str::to_string)
}

/// Converts feed entries to raw reviews. The feed's first entry describes the app
/// itself and has no rating; it is skipped. A single-entry feed is an object, not an array.
pub fn parse_feed_entries(feed: &Value) -> Vec<RawReview> {
    let entries: Vec<Value> = match &feed["feed"]["entry"] {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![feed["feed"]["entry"].clone()],
        _ => vec![],
    };

    entries
        .iter()
        .filter(|e| e.get("im:rating").is_some())
        .map(|e| {
            let mut review = RawReview {
                id: label(e, "id"),
                text: label(e, "content"),
                title: label(e, "title"),
                date: label(e, "updated"),
                version: label(e, "im:version"),
                user_name: e["author"]["name"]["label"].as_str().map(str::to_string),
                score: label(e, "im:rating").and_then(|r| r.parse().ok()),
                ..Default::default()
            };
            if let Some(href) = e["link"]["attributes"]["href"].as_str() {
                review.extra.insert("url".to_string(), json!(href));
            }
            if let Some(votes) = label(e, "im:voteCount").and_then(|v| v.parse::<u64>().ok()) {
                review.extra.insert("voteCount".to_string(), json!(votes));
            }
            review
        })
        .collect()
}

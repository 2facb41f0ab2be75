use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{fetch_error, StoreAdapter};
use crate::error::IngestError;
use crate::models::{RawReview, GOOGLE_PLAY};

/// Google Play has no public review API; reviews come from a scraper gateway that
/// answers `/reviews` and `/app` with JSON. The gateway gets banned when hammered,
/// hence the client throttle.
pub struct GooglePlayAdapter {
    client: reqwest::Client,
    base_url: String,
    throttle: Option<Duration>,
}

#[derive(Deserialize)]
struct AppInfo {
    version: Option<String>,
}

impl GooglePlayAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, throttle: Option<Duration>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            throttle,
        }
    }

    fn reviews_url(&self, app_id: &str, page: u32) -> String {
        format!("{}/reviews?appId={}&page={}", self.base_url, urlencoding::encode(app_id), page)
    }

    fn app_url(&self, app_id: &str) -> String {
        format!("{}/app?appId={}", self.base_url, urlencoding::encode(app_id))
    }
}

#[async_trait]
impl StoreAdapter for GooglePlayAdapter {
    fn store_name(&self) -> &str {
        GOOGLE_PLAY
    }

    fn throttle(&self) -> Option<Duration> {
        self.throttle
    }

    async fn reviews(&self, app_id: &str, page: u32) -> Result<Vec<RawReview>, IngestError> {
        let url = self.reviews_url(app_id, page);
        let resp = self.client.get(&url).send().await.map_err(|e| fetch_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(IngestError::SourceFetch(format!("{}: http {}", url, resp.status())));
        }
        resp.json::<Vec<RawReview>>().await.map_err(|e| fetch_error(&url, e))
    }

    async fn current_version(&self, app_id: &str) -> Result<String, IngestError> {
        let url = self.app_url(app_id);
        let resp = self.client.get(&url).send().await.map_err(|e| fetch_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(IngestError::SourceFetch(format!("{}: http {}", url, resp.status())));
        }
        let info: AppInfo = resp.json().await.map_err(|e| fetch_error(&url, e))?;
        // listings without a version leave the fallback empty
        Ok(info.version.unwrap_or_default())
    }
}

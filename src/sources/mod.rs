pub mod appstore;
pub mod googleplay;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::IngestError;
use crate::models::RawReview;

pub use appstore::AppStoreAdapter;
pub use googleplay::GooglePlayAdapter;

/// One review store: how to page through an app's reviews and what its current
/// release version is.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Name the store is configured under, e.g. "App Store".
    fn store_name(&self) -> &str;

    /// Spacing between page requests when the store needs client-side rate limiting.
    fn throttle(&self) -> Option<Duration> {
        None
    }

    async fn reviews(&self, app_id: &str, page: u32) -> Result<Vec<RawReview>, IngestError>;

    async fn current_version(&self, app_id: &str) -> Result<String, IngestError>;
}

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn StoreAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn StoreAdapter>) {
        self.adapters.insert(adapter.store_name().to_string(), adapter);
    }

    pub fn get(&self, store: &str) -> Option<Arc<dyn StoreAdapter>> {
        self.adapters.get(store).cloned()
    }

    pub fn store_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("review-indexer/0.1")
        .timeout(Duration::from_secs(20))
        .build()
}

pub(crate) fn fetch_error(context: &str, e: reqwest::Error) -> IngestError {
    IngestError::SourceFetch(format!("{}: {}", context, e))
}

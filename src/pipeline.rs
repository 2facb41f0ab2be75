use log::{error, info, warn};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::analysis::{enrich, Analyzer, MAX_ANALYSIS_BATCH};
use crate::db::ReviewStore;
use crate::dedup::{drop_known, ensure_newest_first};
use crate::error::{IngestError, Stage};
use crate::fetch::fetch_app_reviews;
use crate::models::{AppTarget, NormalizedReview, Sentiment};
use crate::normalize::normalize;
use crate::sources::AdapterRegistry;
use crate::truncate::{truncate_reviews, DEFAULT_MAX_TEXT_BYTES};
use crate::writer::{write_batches, MAX_WRITE_BATCH};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pages: RangeInclusive<u32>,
    pub batch_size: usize,
    pub max_text_bytes: usize,
    pub language: String,
    pub analysis_batch_size: usize,
    pub dry_run: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pages: 0..=9,
            batch_size: MAX_WRITE_BATCH,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
            language: "en".to_string(),
            analysis_batch_size: MAX_ANALYSIS_BATCH,
            dry_run: false,
        }
    }
}

/// Share of each sentiment label among analysed reviews, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct SentimentBreakdown {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
    pub mixed: f64,
}

impl SentimentBreakdown {
    /// `None` when none of the records carry an analysis.
    pub fn from_records(records: &[NormalizedReview]) -> Option<Self> {
        let labels: Vec<Sentiment> = records.iter().filter_map(|r| r.analysis.as_ref().map(|a| a.sentiment)).collect();
        if labels.is_empty() {
            return None;
        }
        let share = |s: Sentiment| labels.iter().filter(|l| **l == s).count() as f64 * 100.0 / labels.len() as f64;
        Some(Self {
            positive: share(Sentiment::Positive),
            negative: share(Sentiment::Negative),
            neutral: share(Sentiment::Neutral),
            mixed: share(Sentiment::Mixed),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppOutcome {
    Ingested {
        fetched: usize,
        skipped: usize,
        new: usize,
        written: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        sentiment: Option<SentimentBreakdown>,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppReport {
    pub app_id_store: String,
    #[serde(flatten)]
    pub outcome: AppOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub apps: Vec<AppReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.apps.iter().filter(|a| matches!(a.outcome, AppOutcome::Ingested { .. })).count()
    }

    pub fn failed(&self) -> usize {
        self.apps.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn total_written(&self) -> usize {
        self.apps
            .iter()
            .map(|a| match a.outcome {
                AppOutcome::Ingested { written, .. } => written,
                AppOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Fetch, normalize, dedupe, analyse and write the reviews of each configured app.
pub struct Pipeline {
    registry: AdapterRegistry,
    store: Arc<dyn ReviewStore>,
    analyzer: Option<Arc<dyn Analyzer>>,
    settings: PipelineSettings,
}

pub type StageResult<T> = Result<T, (Stage, IngestError)>;

fn at<T>(stage: Stage, r: Result<T, IngestError>) -> StageResult<T> {
    r.map_err(|e| (stage, e))
}

impl Pipeline {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn ReviewStore>, settings: PipelineSettings) -> Self {
        Self { registry, store, analyzer: None, settings }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Runs every app in turn. A failing app is reported and the run moves on.
    pub async fn run(&self, apps: &[AppTarget]) -> RunSummary {
        let mut summary = RunSummary::default();
        for app in apps {
            let key = app.app_id_store();
            let outcome = match self.ingest_app(app).await {
                Ok(outcome) => outcome,
                Err((stage, e)) => {
                    error!("{}: failed while {}: {}", key, stage, e);
                    AppOutcome::Failed { stage, error: e.to_string() }
                }
            };
            summary.apps.push(AppReport { app_id_store: key, outcome });
        }
        info!(
            "run done: {} apps ok, {} failed, {} reviews written",
            summary.succeeded(),
            summary.failed(),
            summary.total_written()
        );
        summary
    }

    pub async fn ingest_app(&self, app: &AppTarget) -> StageResult<AppOutcome> {
        let key = app.app_id_store();
        let s = &self.settings;

        let adapter = self.registry.get(&app.store).ok_or_else(|| {
            (Stage::Fetching, IngestError::SourceFetch(format!("no adapter registered for store {:?}", app.store)))
        })?;
        let version = at(Stage::Fetching, adapter.current_version(&app.app_id).await)?;
        let raw = at(Stage::Fetching, fetch_app_reviews(adapter.as_ref(), &app.app_id, s.pages.clone()).await)?;
        let fetched = raw.len();

        let mut skipped = 0usize;
        let mut records = Vec::with_capacity(fetched);
        for review in raw {
            match normalize(review, &app.app_id, &app.store, &version) {
                Ok(r) => records.push(r),
                Err(e) => {
                    skipped += 1;
                    warn!("{}: skipping review: {}", key, e);
                }
            }
        }
        let records = ensure_newest_first(records, &key);
        info!("{}: normalized {} of {} reviews (version {:?})", key, records.len(), fetched, version);

        let stored = at(Stage::Deduplicating, self.store.stored_hashes(&key).await)?;
        let fresh = drop_known(records, &stored);
        let new = fresh.len();
        info!("{}: {} new reviews ({} already stored)", key, new, stored.len());

        let fresh = match &self.analyzer {
            Some(analyzer) if !fresh.is_empty() => at(
                Stage::Analyzing,
                enrich(fresh, analyzer.as_ref(), s.analysis_batch_size, &s.language, s.max_text_bytes).await,
            )?,
            Some(_) => fresh,
            None => {
                if !fresh.is_empty() {
                    warn!("{}: no analyzer configured; writing {} reviews without sentiment", key, new);
                }
                truncate_reviews(fresh, s.max_text_bytes)
            }
        };

        let written = if s.dry_run {
            info!("{}: dry run, not writing {} reviews", key, new);
            0
        } else {
            at(Stage::Writing, write_batches(&fresh, s.batch_size, self.store.as_ref()).await)?
        };

        Ok(AppOutcome::Ingested {
            fetched,
            skipped,
            new,
            written,
            sentiment: SentimentBreakdown::from_records(&fresh),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawReview, ReviewAnalysis, SentimentScore};
    use crate::normalize::review_hash;
    use crate::sources::StoreAdapter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    const TEST_STORE: &str = "test store";

    struct MockAdapter {
        pages: HashMap<u32, Vec<RawReview>>,
    }

    #[async_trait]
    impl StoreAdapter for MockAdapter {
        fn store_name(&self) -> &str {
            TEST_STORE
        }

        async fn reviews(&self, _app_id: &str, page: u32) -> Result<Vec<RawReview>, IngestError> {
            Ok(self.pages.get(&page).cloned().unwrap_or_default())
        }

        async fn current_version(&self, _app_id: &str) -> Result<String, IngestError> {
            Ok("2.4.1".to_string())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<NormalizedReview>>,
        puts: Mutex<usize>,
        query_fails: bool,
        fail_on_put: Option<usize>,
    }

    #[async_trait]
    impl ReviewStore for MemoryStore {
        async fn stored_hashes(&self, app_id_store: &str) -> Result<HashSet<String>, IngestError> {
            if self.query_fails {
                return Err(IngestError::DuplicateQuery("connection reset".to_string()));
            }
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().filter(|r| r.app_id_store == app_id_store).map(|r| r.review_hash.clone()).collect())
        }

        async fn put_batch(&self, batch: &[NormalizedReview]) -> Result<(), IngestError> {
            let mut puts = self.puts.lock().unwrap();
            let call = *puts;
            *puts += 1;
            if self.fail_on_put == Some(call) {
                return Err(IngestError::WriteBatch { committed: 0, reason: "disk full".to_string() });
            }
            self.rows.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    /// Serves a few pages, then fails page 3.
    struct FlakyAdapter;

    #[async_trait]
    impl StoreAdapter for FlakyAdapter {
        fn store_name(&self) -> &str {
            "flaky store"
        }

        async fn reviews(&self, _app_id: &str, page: u32) -> Result<Vec<RawReview>, IngestError> {
            if page == 3 {
                return Err(IngestError::SourceFetch("http 503".to_string()));
            }
            Ok(ten_pages().remove(&page).unwrap_or_default())
        }

        async fn current_version(&self, _app_id: &str) -> Result<String, IngestError> {
            Ok("1.0".to_string())
        }
    }

    /// First call errors, second answers one result short, later calls succeed.
    #[derive(Default)]
    struct UnreliableAnalyzer {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Analyzer for UnreliableAnalyzer {
        async fn analyze_batch(&self, texts: &[String], language: &str) -> Result<Vec<ReviewAnalysis>, IngestError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            let mut out = KeywordAnalyzer.analyze_batch(texts, language).await?;
            match call {
                1 => Err(IngestError::Analysis("quota exceeded".to_string())),
                2 => {
                    out.pop();
                    Ok(out)
                }
                _ => Ok(out),
            }
        }
    }

    /// Marks reviews mentioning "love" positive and everything else negative.
    struct KeywordAnalyzer;

    #[async_trait]
    impl Analyzer for KeywordAnalyzer {
        async fn analyze_batch(&self, texts: &[String], _language: &str) -> Result<Vec<ReviewAnalysis>, IngestError> {
            Ok(texts
                .iter()
                .map(|t| ReviewAnalysis {
                    sentiment: if t.contains("love") { Sentiment::Positive } else { Sentiment::Negative },
                    sentiment_score: SentimentScore::default(),
                    keywords: vec![],
                })
                .collect())
        }
    }

    /// Ten pages of one review each, newest on page 0, tagged with their page index.
    fn ten_pages() -> HashMap<u32, Vec<RawReview>> {
        (0..10u32)
            .map(|i| {
                let raw: RawReview = serde_json::from_value(json!({
                    "id": format!("r{}", i),
                    "text": format!("review number {}", i),
                    "date": format!("2024-01-{:02}T08:00:00Z", 20 - i),
                    "title": "",
                    "page": i
                }))
                .unwrap();
                (i, vec![raw])
            })
            .collect()
    }

    fn pipeline(pages: HashMap<u32, Vec<RawReview>>, store: Arc<MemoryStore>, settings: PipelineSettings) -> Pipeline {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter { pages }));
        Pipeline::new(registry, store, settings)
    }

    #[tokio::test]
    async fn ten_pages_land_in_page_order_under_composite_key() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(ten_pages(), store.clone(), PipelineSettings::default());

        let summary = p.run(&[AppTarget::new("test", TEST_STORE)]).await;
        assert!(summary.is_success());
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Ingested { fetched: 10, skipped: 0, new: 10, written: 10, sentiment: None }
        );

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 10);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.app_id_store, "test*test store");
            assert_eq!(row.review.extra["page"], json!(i));
            assert_eq!(row.version, "2.4.1");
            assert_eq!(row.review.title, None);
        }
        assert_eq!(*store.puts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn second_run_writes_only_reviews_newer_than_stored() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(ten_pages(), store.clone(), PipelineSettings::default());
        let app = AppTarget::new("test", TEST_STORE);

        p.run(std::slice::from_ref(&app)).await;
        // keep only what was ingested from page 4 onward
        store.rows.lock().unwrap().retain(|r| r.review.extra["page"].as_u64().unwrap_or(0) >= 4);

        let summary = p.run(&[app]).await;
        match &summary.apps[0].outcome {
            AppOutcome::Ingested { new, written, .. } => {
                assert_eq!(*new, 4);
                assert_eq!(*written, 4);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let hashes: HashSet<String> = store.rows.lock().unwrap().iter().map(|r| r.review_hash.clone()).collect();
        assert!(hashes.contains(&review_hash("review number 0", "r0")));
        assert_eq!(hashes.len(), 10);
    }

    #[tokio::test]
    async fn failing_app_is_reported_and_others_still_run() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(ten_pages(), store.clone(), PipelineSettings::default());

        let summary = p
            .run(&[
                AppTarget::new("first", TEST_STORE),
                AppTarget::new("lost", "Windows Store"),
                AppTarget::new("second", TEST_STORE),
            ])
            .await;
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());
        assert_eq!(summary.total_written(), 20);
        match &summary.apps[1].outcome {
            AppOutcome::Failed { stage, error } => {
                assert_eq!(*stage, Stage::Fetching);
                assert!(error.contains("Windows Store"), "{}", error);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn stored_hash_query_failure_fails_deduplicating() {
        let store = Arc::new(MemoryStore { query_fails: true, ..Default::default() });
        let p = pipeline(ten_pages(), store.clone(), PipelineSettings::default());

        let summary = p.run(&[AppTarget::new("test", TEST_STORE)]).await;
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Failed {
                stage: Stage::Deduplicating,
                error: "Stored review query failed: connection reset".to_string()
            }
        );
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_reviews_are_skipped_and_counted() {
        let mut pages = ten_pages();
        pages.get_mut(&2).unwrap().push(RawReview { id: Some("no-text".to_string()), ..Default::default() });
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(pages, store.clone(), PipelineSettings::default());

        let summary = p.run(&[AppTarget::new("test", TEST_STORE)]).await;
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Ingested { fetched: 11, skipped: 1, new: 10, written: 10, sentiment: None }
        );
    }

    #[tokio::test]
    async fn dry_run_counts_but_does_not_write() {
        let store = Arc::new(MemoryStore::default());
        let settings = PipelineSettings { dry_run: true, ..Default::default() };
        let p = pipeline(ten_pages(), store.clone(), settings);

        let summary = p.run(&[AppTarget::new("test", TEST_STORE)]).await;
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Ingested { fetched: 10, skipped: 0, new: 10, written: 0, sentiment: None }
        );
        assert_eq!(*store.puts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn analysed_reviews_carry_sentiment_and_breakdown() {
        let mut pages = ten_pages();
        for (i, reviews) in pages.iter_mut() {
            if i % 2 == 0 {
                reviews[0].text = Some(format!("I love version {}", i));
            }
        }
        let store = Arc::new(MemoryStore::default());
        let settings = PipelineSettings { batch_size: 4, analysis_batch_size: 3, ..Default::default() };
        let p = pipeline(pages, store.clone(), settings).with_analyzer(Arc::new(KeywordAnalyzer));

        let summary = p.run(&[AppTarget::new("test", TEST_STORE)]).await;
        match &summary.apps[0].outcome {
            AppOutcome::Ingested { written, sentiment, .. } => {
                assert_eq!(*written, 10);
                let s = sentiment.expect("breakdown");
                assert!((s.positive - 50.0).abs() < 1e-9);
                assert!((s.negative - 50.0).abs() < 1e-9);
                assert_eq!(s.neutral, 0.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let rows = store.rows.lock().unwrap();
        assert!(rows.iter().all(|r| r.analysis.is_some()));
        assert_eq!(rows[0].analysis.as_ref().unwrap().sentiment, Sentiment::Positive);
        assert_eq!(rows[1].analysis.as_ref().unwrap().sentiment, Sentiment::Negative);
        assert_eq!(*store.puts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn failing_page_fails_fetching_and_later_apps_still_run() {
        let store = Arc::new(MemoryStore::default());
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter { pages: ten_pages() }));
        registry.register(Arc::new(FlakyAdapter));
        let p = Pipeline::new(registry, store.clone(), PipelineSettings::default());

        let summary = p.run(&[AppTarget::new("a", "flaky store"), AppTarget::new("b", TEST_STORE)]).await;
        match &summary.apps[0].outcome {
            AppOutcome::Failed { stage, error } => {
                assert_eq!(*stage, Stage::Fetching);
                assert_eq!(error, "Source fetch failed: page 3: http 503");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.total_written(), 10);
        assert!(store.rows.lock().unwrap().iter().all(|r| r.app_id_store == "b*test store"));
    }

    #[tokio::test]
    async fn analyzer_errors_and_short_answers_fail_analyzing() {
        let store = Arc::new(MemoryStore::default());
        let p = pipeline(ten_pages(), store.clone(), PipelineSettings::default())
            .with_analyzer(Arc::new(UnreliableAnalyzer::default()));

        let summary = p
            .run(&[
                AppTarget::new("a", TEST_STORE),
                AppTarget::new("b", TEST_STORE),
                AppTarget::new("c", TEST_STORE),
            ])
            .await;
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Failed { stage: Stage::Analyzing, error: "Analysis failed: quota exceeded".to_string() }
        );
        assert_eq!(
            summary.apps[1].outcome,
            AppOutcome::Failed {
                stage: Stage::Analyzing,
                error: "Analysis failed: expected 10 results, got 9".to_string()
            }
        );
        assert!(matches!(summary.apps[2].outcome, AppOutcome::Ingested { written: 10, .. }));
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.app_id_store == "c*test store"));
    }

    #[tokio::test]
    async fn write_failure_keeps_first_batch_and_later_apps_still_run() {
        let store = Arc::new(MemoryStore { fail_on_put: Some(1), ..Default::default() });
        let settings = PipelineSettings { batch_size: 4, ..Default::default() };
        let p = pipeline(ten_pages(), store.clone(), settings);

        let summary = p.run(&[AppTarget::new("a", TEST_STORE), AppTarget::new("b", TEST_STORE)]).await;
        assert_eq!(
            summary.apps[0].outcome,
            AppOutcome::Failed {
                stage: Stage::Writing,
                error: "Batch write failed after 4 committed records: batch 1 (4 records): disk full".to_string()
            }
        );
        assert!(matches!(summary.apps[1].outcome, AppOutcome::Ingested { written: 10, .. }));

        let rows = store.rows.lock().unwrap();
        let first: Vec<&NormalizedReview> = rows.iter().filter(|r| r.app_id_store == "a*test store").collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].review.extra["page"], json!(0));
        assert_eq!(rows.len(), 14);
    }

    #[test]
    fn summary_serializes_with_status_tag() {
        let summary = RunSummary {
            apps: vec![
                AppReport {
                    app_id_store: "a*App Store".to_string(),
                    outcome: AppOutcome::Ingested { fetched: 3, skipped: 0, new: 1, written: 1, sentiment: None },
                },
                AppReport {
                    app_id_store: "b*Google Play".to_string(),
                    outcome: AppOutcome::Failed { stage: Stage::Writing, error: "boom".to_string() },
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({"apps": [
                {"app_id_store": "a*App Store", "status": "ingested", "fetched": 3, "skipped": 0, "new": 1, "written": 1},
                {"app_id_store": "b*Google Play", "status": "failed", "stage": "writing", "error": "boom"}
            ]})
        );
    }

    #[test]
    fn breakdown_is_none_without_analysis() {
        assert_eq!(SentimentBreakdown::from_records(&[]), None);
    }
}

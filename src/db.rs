use async_trait::async_trait;
use chrono::DateTime;
use mysql_async::prelude::*;
use mysql_async::{Params, Pool, TxOpts};
use std::collections::HashSet;

use crate::error::IngestError;
use crate::models::{AppTarget, NormalizedReview};

/// Persistence the pipeline needs: hash membership per app/store and bounded batch puts.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn stored_hashes(&self, app_id_store: &str) -> Result<HashSet<String>, IngestError>;

    /// Writes one batch. Rewriting a record with the same key overwrites it.
    async fn put_batch(&self, batch: &[NormalizedReview]) -> Result<(), IngestError>;
}

pub struct MySqlReviewStore {
    pool: Pool,
}

impl MySqlReviewStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// `2001-12-01T00:00:00.000Z` -> `2001-12-01 00:00:00.000`
fn mysql_datetime(iso: &str) -> Result<String, String> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .map_err(|e| format!("bad review date {:?}: {}", iso, e))
}

fn row_params(record: &NormalizedReview) -> Result<Params, String> {
    let review = serde_json::to_string(&record.review).map_err(|e| e.to_string())?;
    let (sentiment, sentiment_score, keywords) = match &record.analysis {
        Some(a) => (
            Some(a.sentiment.as_str().to_string()),
            Some(serde_json::to_string(&a.sentiment_score).map_err(|e| e.to_string())?),
            Some(serde_json::to_string(&a.keywords).map_err(|e| e.to_string())?),
        ),
        None => (None, None, None),
    };
    Ok(params! {
        "app_id_store" => &record.app_id_store,
        "review_hash" => &record.review_hash,
        "review_date" => mysql_datetime(&record.date)?,
        "version" => &record.version,
        "review" => review,
        "sentiment" => sentiment,
        "sentiment_score" => sentiment_score,
        "keywords" => keywords,
    })
}

#[async_trait]
impl ReviewStore for MySqlReviewStore {
    async fn stored_hashes(&self, app_id_store: &str) -> Result<HashSet<String>, IngestError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| IngestError::DuplicateQuery(e.to_string()))?;
        let rows: Vec<String> = conn
            .exec(
                "SELECT review_hash FROM indexer_app_reviews WHERE app_id_store = ? ORDER BY review_date DESC",
                (app_id_store,),
            )
            .await
            .map_err(|e| IngestError::DuplicateQuery(e.to_string()))?;
        Ok(rows.into_iter().collect())
    }

    async fn put_batch(&self, batch: &[NormalizedReview]) -> Result<(), IngestError> {
        let write_err = |reason: String| IngestError::WriteBatch { committed: 0, reason };
        let params = batch
            .iter()
            .map(row_params)
            .collect::<Result<Vec<Params>, String>>()
            .map_err(write_err)?;

        let mut conn = self.pool.get_conn().await.map_err(|e| write_err(e.to_string()))?;
        // a batch lands whole or not at all
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tx.exec_batch(
            r#"INSERT INTO indexer_app_reviews
                   (app_id_store, review_hash, review_date, version, review, sentiment, sentiment_score, keywords)
               VALUES (:app_id_store, :review_hash, :review_date, :version, :review, :sentiment, :sentiment_score, :keywords)
               ON DUPLICATE KEY UPDATE
                   review_date=VALUES(review_date), version=VALUES(version), review=VALUES(review),
                   sentiment=VALUES(sentiment), sentiment_score=VALUES(sentiment_score), keywords=VALUES(keywords)"#,
            params,
        )
        .await
        .map_err(|e| write_err(e.to_string()))?;
        tx.commit().await.map_err(|e| write_err(e.to_string()))?;
        Ok(())
    }
}

/// Enabled rows of the app scraping list.
pub async fn load_apps(pool: &Pool) -> anyhow::Result<Vec<AppTarget>> {
    let mut conn = pool.get_conn().await?;
    let apps = conn
        .exec_map(
            "SELECT app_id, store, name FROM indexer_review_apps WHERE enabled = TRUE ORDER BY store, app_id",
            (),
            |(app_id, store, name): (String, String, Option<String>)| AppTarget { app_id, store, name },
        )
        .await?;
    Ok(apps)
}

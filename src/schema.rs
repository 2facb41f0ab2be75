use mysql_async::prelude::*;
use mysql_async::Pool;

pub async fn ensure_review_tables(pool: &Pool) -> anyhow::Result<()> {
    let mut conn = pool.get_conn().await?;

    // One row per review per app/store; the hash is the review's identity
    conn.query_drop(r#"
        CREATE TABLE IF NOT EXISTS indexer_app_reviews (
            app_id_store VARCHAR(255) NOT NULL,
            review_hash CHAR(64) NOT NULL,
            review_date DATETIME(3) NOT NULL,
            version VARCHAR(64) NOT NULL DEFAULT '',
            review JSON NOT NULL,
            sentiment ENUM('POSITIVE','NEGATIVE','NEUTRAL','MIXED') NULL,
            sentiment_score JSON NULL,
            keywords JSON NULL,
            ingested_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
            PRIMARY KEY (app_id_store, review_hash),
            INDEX idx_app_date (app_id_store, review_date)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#).await?;

    // App scraping list, used with --from-db-apps
    conn.query_drop(r#"
        CREATE TABLE IF NOT EXISTS indexer_review_apps (
            app_id VARCHAR(255) NOT NULL,
            store VARCHAR(32) NOT NULL,
            name VARCHAR(255) NULL,
            enabled BOOL NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
            PRIMARY KEY (app_id, store)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
    "#).await?;

    Ok(())
}

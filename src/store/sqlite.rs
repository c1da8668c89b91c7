use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use sqlx::{
    error::ErrorKind,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use tokio::sync::OnceCell;
use tokio::time::Duration;
use tracing::{debug, info, instrument};

use super::{
    AnalysisLogEntry, Article, ArticleStore, DailyStats, UpsertOutcome, RECENT_SENTIMENT_WINDOW,
};
use crate::analyze::{AnalysisResult, Impact, Sentiment};
use crate::error::{PipelineError, Result};
use crate::health::HealthCounts;
use crate::ingest::types::RawArticle;

const TARGET_STORE: &str = "store";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    published_at INTEGER,
    collected_at INTEGER NOT NULL,
    analyzed_at INTEGER,
    summary_local TEXT,
    summary_en TEXT,
    sentiment TEXT CHECK (sentiment IN ('positive', 'negative', 'neutral')),
    sentiment_score REAL CHECK (sentiment_score >= 0.0 AND sentiment_score <= 1.0),
    topics TEXT,
    entities TEXT,
    impact TEXT,
    processing_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_articles_collected_at ON articles (collected_at);
CREATE INDEX IF NOT EXISTS idx_articles_analyzed_at ON articles (analyzed_at);

CREATE TABLE IF NOT EXISTS analysis_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER REFERENCES articles (id),
    operation TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('completed', 'failed')),
    error_message TEXT,
    processing_ms INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_logs_created_at ON analysis_logs (created_at, status);
"#;

/// Pooled SQLite store. File-backed pools connect lazily, so the schema is
/// created by the first query that reaches the database.
#[derive(Clone)]
pub struct SqliteArticleStore {
    pool: Pool<Sqlite>,
    schema: Arc<OnceCell<()>>,
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    url: String,
    source: String,
    category: String,
    title: String,
    body: String,
    published_at: Option<i64>,
    collected_at: i64,
    analyzed_at: Option<i64>,
    summary_local: Option<String>,
    summary_en: Option<String>,
    sentiment: Option<String>,
    sentiment_score: Option<f64>,
    topics: Option<String>,
    entities: Option<String>,
    impact: Option<String>,
    processing_ms: Option<i64>,
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn corrupt(id: i64, what: &str) -> PipelineError {
    PipelineError::Persistence(format!("article {id}: stored {what} is unreadable"))
}

impl ArticleRow {
    fn into_article(self) -> Result<Article> {
        let analysis = match self.analyzed_at {
            None => None,
            Some(at) => {
                let id = self.id;
                let sentiment = Sentiment::from_str(self.sentiment.as_deref().unwrap_or(""))
                    .map_err(|_| corrupt(id, "sentiment"))?;
                let impact = Impact::from_str(self.impact.as_deref().unwrap_or("unknown"))
                    .map_err(|_| corrupt(id, "impact"))?;
                let topics: Vec<String> =
                    serde_json::from_str(self.topics.as_deref().unwrap_or("[]"))
                        .map_err(|_| corrupt(id, "topics"))?;
                let entities: Vec<String> =
                    serde_json::from_str(self.entities.as_deref().unwrap_or("[]"))
                        .map_err(|_| corrupt(id, "entities"))?;
                Some(AnalysisResult {
                    summary_local: self.summary_local.unwrap_or_default(),
                    summary_en: self.summary_en.unwrap_or_default(),
                    sentiment,
                    sentiment_score: self.sentiment_score.unwrap_or_default(),
                    topics,
                    entities,
                    impact,
                    analyzed_at: ts(at),
                    processing_ms: self.processing_ms.unwrap_or_default().max(0) as u64,
                })
            }
        };
        Ok(Article {
            id: self.id,
            url: self.url,
            source: self.source,
            category: self.category,
            title: self.title,
            body: self.body,
            published_at: self.published_at.map(ts),
            collected_at: ts(self.collected_at),
            analysis,
        })
    }
}

impl SqliteArticleStore {
    /// Pool for the database file at `path`. No connection is opened here;
    /// an unreachable file surfaces as a `Persistence` error on first use.
    #[instrument(target = "store", level = "info")]
    pub fn new(path: &str) -> Result<Self> {
        info!(target: TARGET_STORE, "Creating database pool for: {}", path);

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| PipelineError::Configuration(format!("database path {path}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(connect_options);

        Ok(Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        })
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;
        let store = Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        };
        store.ready().await?;
        Ok(store)
    }

    /// The pool, once the schema exists. A failed attempt is retried on the
    /// next call.
    async fn ready(&self) -> Result<&Pool<Sqlite>> {
        self.schema
            .get_or_try_init(|| async {
                let mut conn = self.pool.acquire().await?;
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(SCHEMA)).await?;
                info!(target: TARGET_STORE, "Database schema ready");
                Ok::<(), PipelineError>(())
            })
            .await?;
        Ok(&self.pool)
    }
}

#[async_trait]
impl ArticleStore for SqliteArticleStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(self.ready().await?)
            .await?;
        Ok(())
    }

    async fn upsert(&self, article: &RawArticle) -> Result<UpsertOutcome> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO articles (url, source, category, title, body, published_at, collected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&article.url)
        .bind(&article.source)
        .bind(&article.category)
        .bind(&article.title)
        .bind(&article.body)
        .bind(article.published_at.map(|d| d.timestamp()))
        .bind(Utc::now().timestamp())
        .fetch_optional(self.ready().await?)
        .await?;

        match inserted {
            Some(article_id) => Ok(UpsertOutcome {
                inserted: true,
                article_id,
            }),
            None => {
                let article_id =
                    sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE url = ?")
                        .bind(&article.url)
                        .fetch_one(self.ready().await?)
                        .await?;
                debug!(target: TARGET_STORE, url = %article.url, article_id, "duplicate url");
                Ok(UpsertOutcome {
                    inserted: false,
                    article_id,
                })
            }
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(self.ready().await?)
            .await?;
        row.map(ArticleRow::into_article).transpose()
    }

    async fn fetch_unanalyzed(&self, limit: usize) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT * FROM articles
            WHERE analyzed_at IS NULL
            ORDER BY collected_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.ready().await?)
        .await?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    async fn attach_analysis(&self, id: i64, result: &AnalysisResult) -> Result<bool> {
        let topics = serde_json::to_string(&result.topics)?;
        let entities = serde_json::to_string(&result.entities)?;

        let mut tx = self.ready().await?.begin().await?;
        let res = sqlx::query(
            r#"
            UPDATE articles SET
                analyzed_at = ?1,
                summary_local = ?2,
                summary_en = ?3,
                sentiment = ?4,
                sentiment_score = ?5,
                topics = ?6,
                entities = ?7,
                impact = ?8,
                processing_ms = ?9
            WHERE id = ?10 AND analyzed_at IS NULL
            "#,
        )
        .bind(result.analyzed_at.timestamp())
        .bind(&result.summary_local)
        .bind(&result.summary_en)
        .bind(result.sentiment.as_str())
        .bind(result.sentiment_score)
        .bind(topics)
        .bind(entities)
        .bind(result.impact.as_str())
        .bind(result.processing_ms as i64)
        .bind(id)
        .execute(&mut *tx)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 1 => {
                tx.commit().await?;
                Ok(true)
            }
            Ok(_) => {
                tx.rollback().await?;
                Ok(false)
            }
            Err(sqlx::Error::Database(db))
                if matches!(db.kind(), ErrorKind::CheckViolation | ErrorKind::NotNullViolation) =>
            {
                debug!(target: TARGET_STORE, article_id = id, error = %db, "analysis rejected by constraint");
                tx.rollback().await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn log_analysis(&self, entry: &AnalysisLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_logs (article_id, operation, status, error_message, processing_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.article_id)
        .bind(&entry.operation)
        .bind(entry.status.as_str())
        .bind(entry.error.as_deref())
        .bind(entry.processing_ms.map(|ms| ms as i64))
        .bind(entry.at.timestamp())
        .execute(self.ready().await?)
        .await?;
        Ok(())
    }

    async fn health_counts(&self) -> Result<HealthCounts> {
        let since = (Utc::now() - ChronoDuration::hours(24)).timestamp();
        let (total, analyzed, new_24h, ok_24h, failed_24h, avg_ms) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, Option<f64>)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM articles),
                    (SELECT COUNT(*) FROM articles WHERE analyzed_at IS NOT NULL),
                    (SELECT COUNT(*) FROM articles WHERE collected_at >= ?1),
                    (SELECT COUNT(*) FROM analysis_logs WHERE status = 'completed' AND created_at >= ?1),
                    (SELECT COUNT(*) FROM analysis_logs WHERE status = 'failed' AND created_at >= ?1),
                    (SELECT AVG(processing_ms) FROM analysis_logs
                        WHERE status = 'completed' AND created_at >= ?1 AND processing_ms IS NOT NULL)
                "#,
            )
            .bind(since)
            .fetch_one(self.ready().await?)
            .await?;

        let dist = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT sentiment, COUNT(*) FROM (
                SELECT sentiment FROM articles
                WHERE analyzed_at IS NOT NULL AND sentiment IS NOT NULL
                ORDER BY analyzed_at DESC, id DESC
                LIMIT ?1
            )
            GROUP BY sentiment
            "#,
        )
        .bind(RECENT_SENTIMENT_WINDOW as i64)
        .fetch_all(self.ready().await?)
        .await?;

        Ok(HealthCounts {
            total_articles: total.max(0) as u64,
            analyzed_articles: analyzed.max(0) as u64,
            articles_24h: new_24h.max(0) as u64,
            successful_analyses_24h: ok_24h.max(0) as u64,
            failed_analyses_24h: failed_24h.max(0) as u64,
            avg_processing_ms_24h: avg_ms.unwrap_or(0.0),
            recent_sentiment: dist
                .into_iter()
                .map(|(label, n)| (label, n.max(0) as u64))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    async fn daily_stats(&self, days: u32) -> Result<Vec<DailyStats>> {
        let days = days.max(1) as i64;
        let first_day = Utc::now().date_naive() - ChronoDuration::days(days - 1);
        let since = first_day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let rows = sqlx::query_as::<_, (String, i64, i64, Option<f64>)>(
            r#"
            SELECT date(collected_at, 'unixepoch') AS day,
                   COUNT(*),
                   COUNT(analyzed_at),
                   AVG(sentiment_score)
            FROM articles
            WHERE collected_at >= ?1
            GROUP BY day
            ORDER BY day DESC
            "#,
        )
        .bind(since)
        .fetch_all(self.ready().await?)
        .await?;

        rows.into_iter()
            .map(|(day, total, analyzed, avg)| {
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
                    PipelineError::Persistence(format!("unexpected day '{day}': {e}"))
                })?;
                Ok(DailyStats {
                    day,
                    total: total.max(0) as u64,
                    analyzed: analyzed.max(0) as u64,
                    avg_sentiment_score: avg,
                })
            })
            .collect()
    }
}

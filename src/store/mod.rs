// src/store/mod.rs
//! Deduplicating article persistence.
//!
//! URL is the identity of an article: a second upsert of the same URL is a
//! no-op that reports the existing id. Analysis is attached at most once.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::AnalysisResult;
use crate::error::Result;
use crate::health::HealthCounts;
use crate::ingest::types::RawArticle;

pub use memory::InMemoryArticleStore;
pub use sqlite::SqliteArticleStore;

/// How many recently analysed articles feed the sentiment distribution.
pub const RECENT_SENTIMENT_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub source: String,
    pub category: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub analysis: Option<AnalysisResult>,
}

impl Article {
    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// `false` when the URL was already stored.
    pub inserted: bool,
    pub article_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Completed,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisLogEntry {
    pub article_id: Option<i64>,
    pub operation: String,
    pub status: LogStatus,
    pub error: Option<String>,
    pub processing_ms: Option<u64>,
    pub at: DateTime<Utc>,
}

impl AnalysisLogEntry {
    pub fn completed(article_id: i64, processing_ms: u64) -> Self {
        Self {
            article_id: Some(article_id),
            operation: "analyze".into(),
            status: LogStatus::Completed,
            error: None,
            processing_ms: Some(processing_ms),
            at: Utc::now(),
        }
    }

    pub fn failed(article_id: i64, error: impl Into<String>) -> Self {
        Self {
            article_id: Some(article_id),
            operation: "analyze".into(),
            status: LogStatus::Failed,
            error: Some(error.into()),
            processing_ms: None,
            at: Utc::now(),
        }
    }
}

/// One row of the daily report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub total: u64,
    pub analyzed: u64,
    pub avg_sentiment_score: Option<f64>,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;

    async fn upsert(&self, article: &RawArticle) -> Result<UpsertOutcome>;

    async fn get(&self, id: i64) -> Result<Option<Article>>;

    /// Up to `limit` unanalysed articles, most recently collected first.
    async fn fetch_unanalyzed(&self, limit: usize) -> Result<Vec<Article>>;

    /// `Ok(false)` when the article is missing, already analysed, or the
    /// result violates a store constraint.
    async fn attach_analysis(&self, id: i64, result: &AnalysisResult) -> Result<bool>;

    async fn log_analysis(&self, entry: &AnalysisLogEntry) -> Result<()>;

    async fn health_counts(&self) -> Result<HealthCounts>;

    /// Per-day totals for the last `days` days, newest day first.
    async fn daily_stats(&self, days: u32) -> Result<Vec<DailyStats>>;
}

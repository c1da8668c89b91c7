// tests/common/mod.rs
//
// Scripted collaborators shared by the pipeline integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use news_insights::analyze::{AnalysisEngine, AnalysisResult, Impact, Sentiment};
use news_insights::config::{PipelineSettings, RetrySettings};
use news_insights::error::{PipelineError, Result};
use news_insights::health::HealthCounts;
use news_insights::ingest::types::RawArticle;
use news_insights::ingest::{FeedSource, SourceDescriptor};
use news_insights::notify::NotifierMux;
use news_insights::pipeline::{PipelineOrchestrator, RetryPolicy};
use news_insights::store::{
    AnalysisLogEntry, Article, ArticleStore, DailyStats, InMemoryArticleStore, UpsertOutcome,
};

pub fn source(name: &str) -> SourceDescriptor {
    SourceDescriptor::new(name, &format!("https://{name}.example/rss"), "Technology")
}

pub fn raw(source: &str, i: usize, title: &str) -> RawArticle {
    RawArticle {
        source: source.to_string(),
        category: "Technology".into(),
        title: title.to_string(),
        body: format!("{title}. body {i}"),
        url: format!("https://{source}.example/a/{i}"),
        published_at: None,
    }
}

/// Same attempt counts as production, millisecond waits.
pub fn fast_retry() -> RetrySettings {
    RetrySettings {
        collect: RetryPolicy::fixed(2, Duration::from_millis(1)),
        analyze: RetryPolicy::fixed(2, Duration::from_millis(1)),
        source: RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4)),
        article: RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4)),
    }
}

pub fn settings(sources: &[&str]) -> PipelineSettings {
    PipelineSettings {
        workers: 2,
        batch_size: 20,
        deadline_secs: 60,
        interval_secs: 0,
        retry: fast_retry(),
        sources: sources.iter().map(|s| source(s)).collect(),
    }
}

#[derive(Default)]
pub struct ScriptedFeeds {
    items: HashMap<String, Vec<RawArticle>>,
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` distinct articles for `name`.
    pub fn with_items(mut self, name: &str, n: usize) -> Self {
        let v = (0..n).map(|i| raw(name, i, &format!("{name} story {i}"))).collect();
        self.items.insert(name.to_string(), v);
        self
    }

    pub fn with_articles(mut self, name: &str, v: Vec<RawArticle>) -> Self {
        self.items.insert(name.to_string(), v);
        self
    }

    /// Every fetch of `name` fails with a transient error.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeeds {
    async fn fetch(&self, src: &SourceDescriptor) -> Result<Vec<RawArticle>> {
        *self.calls.lock().unwrap().entry(src.name.clone()).or_default() += 1;
        if self.failing.contains(&src.name) {
            return Err(PipelineError::TransientIo(format!("{} timed out", src.name)));
        }
        Ok(self.items.get(&src.name).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Positive result for every article whose title does not contain `BROKEN`;
/// those get a structural (non-retryable) error.
#[derive(Default)]
pub struct ScriptedEngine {
    calls: AtomicU32,
}

impl ScriptedEngine {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn analysis(sentiment: Sentiment, score: f64) -> AnalysisResult {
    AnalysisResult {
        summary_local: "要約".into(),
        summary_en: "summary".into(),
        sentiment,
        sentiment_score: score,
        topics: vec!["tech".into()],
        entities: vec!["ACME".into()],
        impact: Impact::Medium,
        analyzed_at: Utc::now(),
        processing_ms: 5,
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn analyze(&self, title: &str, _body: &str) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if title.contains("BROKEN") {
            return Err(PipelineError::Structural(
                "missing required field 'sentiment'".into(),
            ));
        }
        Ok(analysis(Sentiment::Positive, 0.8))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Every operation fails as if the database were unreachable.
#[derive(Default)]
pub struct DownStore {
    pub pings: AtomicU32,
}

fn down() -> PipelineError {
    PipelineError::TransientIo("database is unreachable".into())
}

#[async_trait]
impl ArticleStore for DownStore {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Err(down())
    }
    async fn upsert(&self, _article: &RawArticle) -> Result<UpsertOutcome> {
        Err(down())
    }
    async fn get(&self, _id: i64) -> Result<Option<Article>> {
        Err(down())
    }
    async fn fetch_unanalyzed(&self, _limit: usize) -> Result<Vec<Article>> {
        Err(down())
    }
    async fn attach_analysis(&self, _id: i64, _result: &AnalysisResult) -> Result<bool> {
        Err(down())
    }
    async fn log_analysis(&self, _entry: &AnalysisLogEntry) -> Result<()> {
        Err(down())
    }
    async fn health_counts(&self) -> Result<HealthCounts> {
        Err(down())
    }
    async fn daily_stats(&self, _days: u32) -> Result<Vec<DailyStats>> {
        Err(down())
    }
}

pub struct Harness {
    pub feeds: Arc<ScriptedFeeds>,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<InMemoryArticleStore>,
    pub orchestrator: PipelineOrchestrator,
}

pub fn harness(settings: PipelineSettings, feeds: ScriptedFeeds) -> Harness {
    let feeds = Arc::new(feeds);
    let engine = Arc::new(ScriptedEngine::default());
    let store = Arc::new(InMemoryArticleStore::new());
    let orchestrator = PipelineOrchestrator::new(
        settings,
        feeds.clone(),
        store.clone(),
        engine.clone(),
        NotifierMux::empty(),
    )
    .expect("valid settings");
    Harness {
        feeds,
        engine,
        store,
        orchestrator,
    }
}

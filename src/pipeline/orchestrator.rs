// src/pipeline/orchestrator.rs
//! Drives one pipeline invocation through the fixed stage sequence
//! `collect -> analyze -> health_check -> notify`.
//!
//! Units inside a stage (one per feed source, one per article) run on a
//! bounded pool (`buffer_unordered`) and each hands back an owned report;
//! aggregation happens once, after the whole stage has returned. A unit that
//! has not been polled when the run deadline passes is never started and is
//! reported as timed out.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::task_runner::TaskRunner;
use super::{
    AnalysisReport, ArticleError, CollectReport, PipelineRun, PipelineState, SourceReport,
    StageName, StageOutcome, StageRun, STAGES,
};
use crate::analyze::{AnalysisEngine, Impact, Sentiment};
use crate::config::PipelineSettings;
use crate::error::{PipelineError, Result};
use crate::health::HealthEvaluator;
use crate::ingest::{prepare_articles, FeedSource, SourceDescriptor};
use crate::ingest::types::RawArticle;
use crate::notify::{NotifierMux, RunNotification};
use crate::store::{AnalysisLogEntry, Article, ArticleStore};

const TARGET: &str = "pipeline";

pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    feeds: Arc<dyn FeedSource>,
    store: Arc<dyn ArticleStore>,
    engine: Arc<dyn AnalysisEngine>,
    notifier: NotifierMux,
}

/// Outcome of analysing one article, owned by the unit that produced it.
struct ArticleOutcome {
    article_id: i64,
    engine_calls: u32,
    timed_out: bool,
    result: std::result::Result<(Sentiment, Impact, u64), PipelineError>,
}

/// Response item for articles pushed through the webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookOutcome {
    pub url: String,
    pub article_id: Option<i64>,
    pub inserted: bool,
    pub analyzed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct StageClock {
    stage: StageName,
    started_at: chrono::DateTime<Utc>,
    t0: Instant,
}

impl StageClock {
    fn start(stage: StageName) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            t0: Instant::now(),
        }
    }

    fn finish(
        self,
        attempts: u32,
        outcome: StageOutcome,
        error_count: usize,
        metrics: Map<String, Value>,
    ) -> StageRun {
        StageRun {
            stage: self.stage,
            attempts,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.t0.elapsed().as_millis() as u64,
            outcome,
            error_count,
            metrics,
        }
    }
}

fn metrics_map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

impl PipelineOrchestrator {
    /// Fails with [`PipelineError::Configuration`] on an empty source list,
    /// zero workers or a zero batch size; nothing runs in that case.
    pub fn new(
        settings: PipelineSettings,
        feeds: Arc<dyn FeedSource>,
        store: Arc<dyn ArticleStore>,
        engine: Arc<dyn AnalysisEngine>,
        notifier: NotifierMux,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            feeds,
            store,
            engine,
            notifier,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> Arc<dyn ArticleStore> {
        Arc::clone(&self.store)
    }

    /// One full invocation with the configured deadline.
    pub async fn run(&self) -> PipelineRun {
        self.run_until(Instant::now() + self.settings.deadline())
            .await
    }

    pub async fn run_until(&self, deadline: Instant) -> PipelineRun {
        let mut run = PipelineRun::start(Uuid::new_v4());
        let run_id = run.run_id;
        info!(
            target: TARGET,
            %run_id,
            state = ?PipelineState::Init,
            sources = self.settings.sources.len(),
            "pipeline run starting"
        );

        for stage in STAGES {
            info!(target: TARGET, %run_id, state = ?stage.state(), "state transition");
            let stage_run = match stage {
                StageName::Collect => self.collect(deadline, &mut run).await,
                StageName::Analyze => self.analyze(deadline, &mut run).await,
                StageName::HealthCheck => self.health_check(&mut run).await,
                StageName::Notify => self.notify(&mut run).await,
            };
            histogram!("pipeline_stage_duration_ms", "stage" => stage.as_str())
                .record(stage_run.duration_ms as f64);
            info!(
                target: TARGET,
                %run_id,
                stage = stage.as_str(),
                outcome = stage_run.outcome.label(),
                attempts = stage_run.attempts,
                errors = stage_run.error_count,
                duration_ms = stage_run.duration_ms,
                "stage finished"
            );
            run.stages.push(stage_run);
            run.refresh();
        }

        info!(
            target: TARGET,
            %run_id,
            state = ?PipelineState::Completed,
            status = run.status.as_str(),
            total_errors = run.total_errors,
            duration_ms = run.duration_ms,
            "pipeline run finished"
        );
        crate::metrics::record_run(&run);
        run
    }

    // ------------------------------------------------------------
    // Collect
    // ------------------------------------------------------------

    async fn collect(&self, deadline: Instant, run: &mut PipelineRun) -> StageRun {
        let clock = StageClock::start(StageName::Collect);
        let store = self.store.as_ref();

        let probe = TaskRunner::new(self.settings.retry.collect)
            .with_deadline(deadline)
            .retry_when(PipelineError::is_retryable_at_stage)
            .run(move || store.ping())
            .await;
        if let Err(e) = probe.result {
            warn!(target: TARGET, error = %e, attempts = probe.attempts, "store unreachable; collect failed");
            return clock.finish(
                probe.attempts,
                StageOutcome::Failed {
                    error: e.to_string(),
                },
                1,
                Map::new(),
            );
        }

        let feeds = self.feeds.as_ref();
        let runner = TaskRunner::new(self.settings.retry.source).with_deadline(deadline);
        let units: Vec<_> = self
            .settings
            .sources
            .iter()
            .enumerate()
            .map(|(idx, src)| async move {
                if Instant::now() >= deadline {
                    return (idx, source_timed_out(src));
                }
                (idx, collect_source(feeds, store, runner, src).await)
            })
            .collect();

        let mut reports: Vec<(usize, SourceReport)> = stream::iter(units)
            .buffer_unordered(self.settings.workers)
            .collect()
            .await;
        reports.sort_by_key(|(idx, _)| *idx);
        let sources: Vec<SourceReport> = reports.into_iter().map(|(_, r)| r).collect();

        let report = CollectReport {
            new_articles: sources.iter().map(|s| s.new_articles).sum(),
            successful_sources: sources.iter().filter(|s| s.error.is_none()).count(),
            failed_sources: sources.iter().filter(|s| s.is_failed()).count(),
            timed_out_sources: sources.iter().filter(|s| s.timed_out).count(),
            sources,
        };
        let store_errors: usize = report.sources.iter().map(|s| s.store_errors).sum();
        let duplicates: usize = report.sources.iter().map(|s| s.duplicates).sum();
        counter!("pipeline_articles_collected_total").increment(report.new_articles as u64);

        let outcome = if report.timed_out_sources > 0 {
            run.incomplete = true;
            StageOutcome::TimedOut {
                unscheduled: report.timed_out_sources,
            }
        } else if report.failed_sources > 0 || store_errors > 0 {
            StageOutcome::Degraded {
                error: format!(
                    "{} of {} sources failed, {} store errors",
                    report.failed_sources,
                    report.sources.len(),
                    store_errors
                ),
            }
        } else {
            StageOutcome::Succeeded
        };
        let metrics = metrics_map(json!({
            "new_articles": report.new_articles,
            "duplicates": duplicates,
            "successful_sources": report.successful_sources,
            "failed_sources": report.failed_sources,
            "timed_out_sources": report.timed_out_sources,
        }));
        let errors = report.failed_sources + store_errors;
        run.collection = Some(report);
        clock.finish(probe.attempts, outcome, errors, metrics)
    }

    // ------------------------------------------------------------
    // Analyze
    // ------------------------------------------------------------

    async fn analyze(&self, deadline: Instant, run: &mut PipelineRun) -> StageRun {
        let clock = StageClock::start(StageName::Analyze);

        if run.collection.as_ref().is_some_and(|c| c.new_articles == 0) {
            info!(target: TARGET, "no new articles; analysis skipped");
            run.analysis = Some(AnalysisReport::skipped());
            return clock.finish(
                0,
                StageOutcome::Skipped {
                    reason: "no new articles".into(),
                },
                0,
                Map::new(),
            );
        }

        let store = self.store.as_ref();
        let batch_size = self.settings.batch_size;
        let load = TaskRunner::new(self.settings.retry.analyze)
            .with_deadline(deadline)
            .retry_when(PipelineError::is_retryable_at_stage)
            .run(move || store.fetch_unanalyzed(batch_size))
            .await;
        let batch = match load.result {
            Ok(batch) => batch,
            Err(e) => {
                warn!(target: TARGET, error = %e, attempts = load.attempts, "could not load analysis batch");
                return clock.finish(
                    load.attempts,
                    StageOutcome::Failed {
                        error: e.to_string(),
                    },
                    1,
                    Map::new(),
                );
            }
        };
        debug!(target: TARGET, batch = batch.len(), "analysis batch loaded");

        let engine = self.engine.as_ref();
        let runner = TaskRunner::new(self.settings.retry.article).with_deadline(deadline);
        let units: Vec<_> = batch
            .into_iter()
            .map(|article| async move {
                if Instant::now() >= deadline {
                    return ArticleOutcome {
                        article_id: article.id,
                        engine_calls: 0,
                        timed_out: true,
                        result: Err(PipelineError::DeadlineExceeded(format!(
                            "article {}",
                            article.id
                        ))),
                    };
                }
                analyze_article(engine, store, runner, &article).await
            })
            .collect();

        let outcomes: Vec<ArticleOutcome> = stream::iter(units)
            .buffer_unordered(self.settings.workers)
            .collect()
            .await;

        let report = aggregate_analysis(outcomes);
        counter!("pipeline_analyses_total", "outcome" => "succeeded").increment(report.succeeded as u64);
        counter!("pipeline_analyses_total", "outcome" => "failed").increment(report.failed as u64);

        let outcome = if report.timed_out > 0 {
            run.incomplete = true;
            StageOutcome::TimedOut {
                unscheduled: report.timed_out,
            }
        } else if report.failed > 0 {
            StageOutcome::Degraded {
                error: format!("{} of {} articles failed", report.failed, report.processed),
            }
        } else {
            StageOutcome::Succeeded
        };
        let metrics = metrics_map(json!({
            "processed": report.processed,
            "succeeded": report.succeeded,
            "failed": report.failed,
            "timed_out": report.timed_out,
            "engine_calls": report.engine_calls,
            "avg_processing_ms": report.avg_processing_ms,
        }));
        let errors = report.failed;
        run.analysis = Some(report);
        clock.finish(load.attempts, outcome, errors, metrics)
    }

    // ------------------------------------------------------------
    // Health check
    // ------------------------------------------------------------

    async fn health_check(&self, run: &mut PipelineRun) -> StageRun {
        let clock = StageClock::start(StageName::HealthCheck);
        let (snapshot, outcome, errors) = match self.store.health_counts().await {
            Ok(counts) => (HealthEvaluator::evaluate(counts), StageOutcome::Succeeded, 0),
            Err(e) => {
                warn!(target: TARGET, error = %e, "health counts unavailable");
                (
                    HealthEvaluator::degraded(e.to_string()),
                    StageOutcome::Degraded {
                        error: e.to_string(),
                    },
                    1,
                )
            }
        };
        gauge!("pipeline_health_score").set(snapshot.health_score);
        let metrics = metrics_map(json!({
            "status": snapshot.status.as_str(),
            "health_score": snapshot.health_score,
            "analysis_rate": snapshot.analysis_rate,
            "error_rate_24h": snapshot.error_rate_24h,
        }));
        run.health_status = Some(snapshot.status);
        run.health = Some(snapshot);
        clock.finish(1, outcome, errors, metrics)
    }

    // ------------------------------------------------------------
    // Notify
    // ------------------------------------------------------------

    async fn notify(&self, run: &mut PipelineRun) -> StageRun {
        let clock = StageClock::start(StageName::Notify);
        let delivery = self.notifier.notify(&RunNotification::from_run(run)).await;
        let outcome = if delivery.failed.is_empty() {
            StageOutcome::Succeeded
        } else {
            StageOutcome::Degraded {
                error: delivery
                    .failed
                    .iter()
                    .map(|(ch, e)| format!("{ch}: {e}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            }
        };
        let metrics = metrics_map(json!({
            "delivered": delivery.delivered,
            "failed": delivery.failed.iter().map(|(ch, _)| *ch).collect::<Vec<_>>(),
            "quiet": delivery.quiet,
        }));
        clock.finish(1, outcome, delivery.failed.len(), metrics)
    }

    // ------------------------------------------------------------
    // Webhook ingestion
    // ------------------------------------------------------------

    /// Store a pushed article and analyse it right away (no run deadline).
    pub async fn ingest_and_analyze(&self, raw: RawArticle) -> WebhookOutcome {
        let url = raw.url.trim().to_string();
        let mut out = WebhookOutcome {
            url: url.clone(),
            article_id: None,
            inserted: false,
            analyzed: false,
            sentiment: None,
            error: None,
        };

        let Some(article) = prepare_articles(vec![raw]).into_iter().next() else {
            out.error = Some("article needs a title and a link".into());
            return out;
        };
        let upsert = match self.store.upsert(&article).await {
            Ok(u) => u,
            Err(e) => {
                out.error = Some(e.to_string());
                return out;
            }
        };
        out.article_id = Some(upsert.article_id);
        out.inserted = upsert.inserted;
        counter!("pipeline_articles_collected_total").increment(u64::from(upsert.inserted));

        let stored = match self.store.get(upsert.article_id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                out.error = Some(format!("article {} vanished", upsert.article_id));
                return out;
            }
            Err(e) => {
                out.error = Some(e.to_string());
                return out;
            }
        };
        if let Some(existing) = &stored.analysis {
            out.analyzed = true;
            out.sentiment = Some(existing.sentiment);
            return out;
        }

        let runner = TaskRunner::new(self.settings.retry.article);
        let result = analyze_article(self.engine.as_ref(), self.store.as_ref(), runner, &stored).await;
        let label = if result.result.is_ok() { "succeeded" } else { "failed" };
        counter!("pipeline_analyses_total", "outcome" => label).increment(1);
        match result.result {
            Ok((sentiment, _, _)) => {
                out.analyzed = true;
                out.sentiment = Some(sentiment);
            }
            Err(e) => out.error = Some(e.to_string()),
        }
        out
    }
}

fn source_timed_out(src: &SourceDescriptor) -> SourceReport {
    SourceReport {
        source: src.name.clone(),
        error: Some(PipelineError::DeadlineExceeded(format!("source '{}'", src.name)).to_string()),
        error_kind: Some("deadline_exceeded".into()),
        timed_out: true,
        ..SourceReport::default()
    }
}

/// Fetch one source (with retries), normalise, then upsert every item.
async fn collect_source(
    feeds: &dyn FeedSource,
    store: &dyn ArticleStore,
    runner: TaskRunner,
    src: &SourceDescriptor,
) -> SourceReport {
    let fetched = runner.run(|| feeds.fetch(src)).await;
    let mut report = SourceReport {
        source: src.name.clone(),
        attempts: fetched.attempts,
        ..SourceReport::default()
    };

    let raw = match fetched.result {
        Ok(raw) => raw,
        Err(e) => {
            warn!(target: "ingest", source = %src.name, attempts = fetched.attempts, error = %e, "source failed");
            counter!("pipeline_source_errors_total").increment(1);
            report.error_kind = Some(e.kind().to_string());
            report.error = Some(e.to_string());
            return report;
        }
    };

    let items = prepare_articles(raw);
    report.fetched = items.len();
    for item in &items {
        match store.upsert(item).await {
            Ok(o) if o.inserted => report.new_articles += 1,
            Ok(_) => report.duplicates += 1,
            Err(e) => {
                warn!(target: "ingest", source = %src.name, url = %item.url, error = %e, "upsert failed");
                report.store_errors += 1;
            }
        }
    }
    debug!(
        target: "ingest",
        source = %src.name,
        fetched = report.fetched,
        new = report.new_articles,
        duplicates = report.duplicates,
        "source collected"
    );
    report
}

/// Analyse one article, attach the result, write the log entry.
async fn analyze_article(
    engine: &dyn AnalysisEngine,
    store: &dyn ArticleStore,
    runner: TaskRunner,
    article: &Article,
) -> ArticleOutcome {
    let attempt = runner
        .run(|| engine.analyze(&article.title, &article.body))
        .await;
    let engine_calls = attempt.attempts;

    let result = match attempt.result {
        Ok(analysis) => match store.attach_analysis(article.id, &analysis).await {
            Ok(true) => Ok((analysis.sentiment, analysis.impact, analysis.processing_ms)),
            Ok(false) => Err(PipelineError::Persistence(format!(
                "article {} rejected the analysis (already analysed or constraint violated)",
                article.id
            ))),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let entry = match &result {
        Ok((_, _, ms)) => AnalysisLogEntry::completed(article.id, *ms),
        Err(e) => {
            warn!(
                target: "analysis",
                article_id = article.id,
                provider = engine.provider_name(),
                attempts = engine_calls,
                error = %e,
                "article analysis failed"
            );
            AnalysisLogEntry::failed(article.id, e.to_string())
        }
    };
    if let Err(e) = store.log_analysis(&entry).await {
        warn!(target: "analysis", article_id = article.id, error = %e, "could not write analysis log");
    }

    ArticleOutcome {
        article_id: article.id,
        engine_calls,
        timed_out: false,
        result,
    }
}

fn aggregate_analysis(outcomes: Vec<ArticleOutcome>) -> AnalysisReport {
    let mut report = AnalysisReport::default();
    let mut sentiment: BTreeMap<String, usize> = BTreeMap::new();
    let mut impact: BTreeMap<String, usize> = BTreeMap::new();
    let mut ms_total = 0u64;

    for o in outcomes {
        report.engine_calls += o.engine_calls;
        if o.timed_out {
            report.timed_out += 1;
            continue;
        }
        report.processed += 1;
        match o.result {
            Ok((s, i, ms)) => {
                report.succeeded += 1;
                *sentiment.entry(s.as_str().to_string()).or_default() += 1;
                *impact.entry(i.as_str().to_string()).or_default() += 1;
                ms_total += ms;
            }
            Err(e) => {
                report.failed += 1;
                report.errors.push(ArticleError {
                    article_id: o.article_id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    report.errors.sort_by_key(|e| e.article_id);
    report.avg_processing_ms = if report.succeeded == 0 {
        0.0
    } else {
        ms_total as f64 / report.succeeded as f64
    };
    report.sentiment_distribution = sentiment;
    report.impact_distribution = impact;
    report
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::health::HealthEvaluator;
use crate::history::RunHistory;
use crate::ingest::types::RawArticle;
use crate::pipeline::{PipelineOrchestrator, PipelineRun};

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 200;
const DEFAULT_REPORT_DAYS: u32 = 7;
const MAX_REPORT_DAYS: u32 = 90;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub history: Arc<RunHistory>,
    run_lock: Arc<Mutex<()>>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            orchestrator,
            history: Arc::new(RunHistory::with_capacity(500)),
            run_lock: Arc::new(Mutex::new(())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Run once unless another run holds the lock; the run is recorded in history.
    pub async fn try_run(&self) -> Option<PipelineRun> {
        let _guard = self.run_lock.try_lock().ok()?;
        Some(self.run_locked().await)
    }

    /// Wait for any in-flight run, then run once.
    pub async fn run_exclusive(&self) -> PipelineRun {
        let _guard = self.run_lock.lock().await;
        self.run_locked().await
    }

    async fn run_locked(&self) -> PipelineRun {
        let run = self.orchestrator.run().await;
        self.history.push(run.clone());
        run
    }
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/runs", get(list_runs).post(trigger_run))
        .route("/runs/latest", get(latest_run))
        .route("/webhook/articles", post(webhook_articles))
        .route("/reports/daily", get(daily_report))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(handle) => app.merge(crate::metrics::router_for(handle)),
        None => app,
    }
}

fn error_response(status: StatusCode, e: &PipelineError) -> Response {
    (status, Json(json!({ "error": e.to_string(), "kind": e.kind() }))).into_response()
}

async fn status(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().health_counts().await {
        Ok(counts) => Json(HealthEvaluator::evaluate(counts)).into_response(),
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "status: health counts unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthEvaluator::degraded(e.to_string())),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<RunsQuery>,
) -> Json<Vec<PipelineRun>> {
    let n = q.limit.unwrap_or(DEFAULT_RUNS_LIMIT).min(MAX_RUNS_LIMIT);
    Json(state.history.last_n(n))
}

async fn latest_run(State(state): State<AppState>) -> Response {
    match state.history.latest() {
        Some(run) => Json(run).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no runs recorded yet" })),
        )
            .into_response(),
    }
}

async fn trigger_run(State(state): State<AppState>) -> Response {
    match state.try_run().await {
        Some(run) => Json(run).into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a pipeline run is already in progress" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WebhookArticle {
    title: String,
    #[serde(default, alias = "description")]
    content: String,
    #[serde(alias = "url")]
    link: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl From<WebhookArticle> for RawArticle {
    fn from(w: WebhookArticle) -> Self {
        let body = if w.content.trim().is_empty() {
            w.title.clone()
        } else {
            format!("{}. {}", w.title, w.content)
        };
        RawArticle {
            source: w.source.unwrap_or_else(|| "webhook".to_string()),
            category: w.category.unwrap_or_else(|| "General".to_string()),
            title: w.title,
            body,
            url: w.link,
            published_at: w.published_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookBody {
    Many(Vec<WebhookArticle>),
    One(WebhookArticle),
}

async fn webhook_articles(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> Response {
    let items = match body {
        WebhookBody::One(a) => vec![a],
        WebhookBody::Many(v) => v,
    };
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(state.orchestrator.ingest_and_analyze(item.into()).await);
    }
    let analyzed = results.iter().filter(|r| r.analyzed).count();
    tracing::info!(target: "api", received = results.len(), analyzed, "webhook articles processed");
    Json(json!({
        "received": results.len(),
        "analyzed": analyzed,
        "results": results,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct DailyQuery {
    days: Option<u32>,
}

async fn daily_report(State(state): State<AppState>, Query(q): Query<DailyQuery>) -> Response {
    let days = q.days.unwrap_or(DEFAULT_REPORT_DAYS).clamp(1, MAX_REPORT_DAYS);
    match state.orchestrator.store().daily_stats(days).await {
        Ok(rows) => Json(json!({ "days": days, "stats": rows })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

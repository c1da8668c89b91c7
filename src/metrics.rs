use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::pipeline::PipelineRun;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe();
        Ok(Self { handle })
    }
}

/// Router exposing `/metrics` with the Prometheus exposition format.
pub fn router_for(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}

/// One-time metrics registration (so series show up on /metrics with help text).
pub fn describe() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs by final status.");
        describe_counter!(
            "pipeline_articles_collected_total",
            "Articles newly stored by collection or webhook."
        );
        describe_counter!(
            "pipeline_analyses_total",
            "Article analyses by outcome (succeeded/failed)."
        );
        describe_counter!(
            "pipeline_source_errors_total",
            "Feed sources that failed after retries."
        );
        describe_histogram!("pipeline_stage_duration_ms", "Stage wall time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "RSS parse time in milliseconds.");
        describe_gauge!("pipeline_health_score", "Latest health score (0-100).");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the last run finished.");
    });
}

pub fn record_run(run: &PipelineRun) {
    counter!("pipeline_runs_total", "status" => run.status.as_str()).increment(1);
    gauge!("pipeline_last_run_ts").set(run.finished_at.timestamp() as f64);
}

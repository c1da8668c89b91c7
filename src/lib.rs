// src/lib.rs
// Library surface shared by the binary and the integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{PipelineOrchestrator, PipelineRun, RunStatus};

/// Per-request timeout for feed downloads.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(20);

/// Wire the production collaborators: SQLite store, HTTP RSS feeds, the
/// configured analysis provider and the webhook notifiers.
pub fn build_orchestrator(cfg: &AppConfig) -> Result<PipelineOrchestrator> {
    let store = store::sqlite::SqliteArticleStore::new(&cfg.database_path)?;
    let feeds = ingest::RssFeedSource::http(FEED_TIMEOUT)?;
    let engine = analyze::build_engine(&cfg.analysis)?;
    let notifier = notify::NotifierMux::from_settings(&cfg.notify);
    info!(
        db = %cfg.database_path,
        provider = engine.provider_name(),
        channels = ?notifier.channels(),
        sources = cfg.pipeline.sources.len(),
        "orchestrator wired"
    );
    PipelineOrchestrator::new(
        cfg.pipeline.clone(),
        Arc::new(feeds),
        Arc::new(store),
        engine,
        notifier,
    )
}

/// Load config (file + env), build everything and perform one run.
///
/// Errors only on invalid configuration. Everything else, an unreachable
/// database included, is reported in the returned [`PipelineRun`].
pub async fn run_pipeline() -> Result<PipelineRun> {
    let cfg = AppConfig::load()?;
    let orchestrator = build_orchestrator(&cfg)?;
    Ok(orchestrator.run().await)
}

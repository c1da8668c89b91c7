//! News insights pipeline: binary entrypoint.
//! `--once` performs a single run and prints it as JSON; otherwise the
//! scheduler runs every `interval_secs` next to the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use news_insights::{
    api::{self, AppState},
    build_orchestrator, logging,
    metrics::Metrics,
    AppConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let cfg = AppConfig::load().context("loading configuration")?;
    let orchestrator = Arc::new(build_orchestrator(&cfg).context("building pipeline")?);

    if once {
        let run = orchestrator.run().await;
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    let metrics = Metrics::init()?;
    let state = AppState::new(orchestrator).with_metrics(metrics.handle.clone());

    let interval_secs = cfg.pipeline.interval_secs;
    if interval_secs > 0 {
        let sched = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let run = sched.run_exclusive().await;
                info!(run_id = %run.run_id, status = run.status.as_str(), "scheduled run done");
            }
        });
    } else {
        warn!("interval_secs = 0; scheduler disabled, runs only via POST /runs");
    }

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "http api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

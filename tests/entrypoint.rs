// tests/entrypoint.rs
//
// `run_pipeline()` from a configuration file: runtime faults end up in the
// returned run rather than in the error channel.

use std::{env, fs};

use news_insights::health::HealthStatus;
use news_insights::pipeline::{StageName, StageOutcome};
use news_insights::RunStatus;

const ENV_VARS: &[&str] = &[
    "PIPELINE_CONFIG_PATH",
    "DATABASE_PATH",
    "ANALYSIS_PROVIDER",
    "SLACK_WEBHOOK_URL",
    "DISCORD_WEBHOOK_URL",
    "PIPELINE_WORKERS",
    "PIPELINE_BATCH_SIZE",
    "PIPELINE_DEADLINE_SECS",
    "PIPELINE_INTERVAL_SECS",
];

fn clear_env() {
    for k in ENV_VARS {
        env::remove_var(k);
    }
}

const CONFIG: &str = r#"
[pipeline]
workers = 1
deadline_secs = 30

[pipeline.retry.collect]
max_attempts = 2
delay = { kind = "fixed", delay_ms = 1 }

[pipeline.retry.analyze]
max_attempts = 2
delay = { kind = "fixed", delay_ms = 1 }

[[pipeline.sources]]
name = "Local"
endpoint = "http://127.0.0.1:9/rss"

[analysis]
provider = "fixture"
"#;

#[serial_test::serial]
#[tokio::test]
async fn unopenable_database_is_a_failed_run_not_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pipeline.toml");
    fs::write(&config, CONFIG).unwrap();
    let db = dir.path().join("no_such_dir").join("news.db");
    env::set_var("PIPELINE_CONFIG_PATH", &config);
    env::set_var("DATABASE_PATH", &db);

    let result = news_insights::run_pipeline().await;
    clear_env();

    let run = result.expect("runtime faults are reported in the run");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!db.exists());

    let collect = run.stage(StageName::Collect).expect("collect stage");
    assert_eq!(collect.outcome.label(), "failed");
    assert_eq!(collect.attempts, 2);
    assert!(run.collection.is_none());

    let analyze = run.stage(StageName::Analyze).expect("analyze stage");
    assert_eq!(analyze.outcome.label(), "failed");
    assert_eq!(run.health_status, Some(HealthStatus::Unavailable));
    let notify = run.stage(StageName::Notify).expect("notify stage");
    assert_eq!(notify.outcome, StageOutcome::Succeeded);
}

#[serial_test::serial]
#[tokio::test]
async fn invalid_configuration_is_still_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("pipeline.toml");
    fs::write(&config, "[pipeline]\nsources = []\n\n[analysis]\nprovider = \"fixture\"\n").unwrap();
    env::set_var("PIPELINE_CONFIG_PATH", &config);

    let result = news_insights::run_pipeline().await;
    clear_env();

    let err = result.expect_err("empty source list");
    assert!(
        matches!(err, news_insights::PipelineError::Configuration(_)),
        "{err:?}"
    );
}

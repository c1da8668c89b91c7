// src/config/mod.rs
//! Application configuration: TOML file + environment overrides.
//!
//! Resolution order (later wins):
//! 1. built-in defaults (three RSS sources, 3 workers, batch of 20, 1h deadline)
//! 2. `config/pipeline.toml`, or the file named by `PIPELINE_CONFIG_PATH`
//! 3. environment variables (`DATABASE_PATH`, `PIPELINE_WORKERS`, ...)
//!
//! A missing file is not an error; an unreadable or malformed one is.

pub mod analysis;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ingest::types::SourceDescriptor;
use crate::pipeline::task_runner::RetryPolicy;

pub use analysis::AnalysisSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

fn default_database_path() -> String {
    "news_insights.db".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::new(
            "BBC Technology",
            "http://feeds.bbci.co.uk/news/technology/rss.xml",
            "Technology",
        ),
        SourceDescriptor::new(
            "Reuters Business",
            "https://www.reutersagency.com/feed/?best-topics=business-finance&post_type=best",
            "Business",
        ),
        SourceDescriptor::new("TechCrunch", "https://techcrunch.com/feed/", "Technology"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Whole collect stage (store reachability).
    pub collect: RetryPolicy,
    /// Whole analyze stage (batch loading).
    pub analyze: RetryPolicy,
    /// One feed fetch.
    pub source: RetryPolicy,
    /// One model call.
    pub article: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            collect: RetryPolicy::fixed(4, Duration::from_secs(60)),
            analyze: RetryPolicy::fixed(3, Duration::from_secs(30)),
            source: RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(8)),
            article: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub deadline_secs: u64,
    /// Scheduler period for the long-running binary.
    pub interval_secs: u64,
    pub retry: RetrySettings,
    pub sources: Vec<SourceDescriptor>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            batch_size: 20,
            deadline_secs: 3600,
            interval_secs: 3600,
            retry: RetrySettings::default(),
            sources: default_sources(),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Configuration(
                "at least one feed source must be configured".into(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::Configuration("workers must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration("batch_size must be >= 1".into()));
        }
        if let Some(s) = self
            .sources
            .iter()
            .find(|s| s.name.trim().is_empty() || s.endpoint.trim().is_empty())
        {
            return Err(PipelineError::Configuration(format!(
                "source '{}' needs both a name and an endpoint",
                s.name
            )));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    /// Also post when every stage succeeded (otherwise only degraded/failed runs).
    pub notify_on_success: bool,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            discord_webhook_url: None,
            notify_on_success: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub pipeline: PipelineSettings,
    pub analysis: AnalysisSettings,
    pub notify: NotifySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            pipeline: PipelineSettings::default(),
            analysis: AnalysisSettings::default(),
            notify: NotifySettings::default(),
        }
    }
}

impl AppConfig {
    /// Path from `PIPELINE_CONFIG_PATH`, else `config/pipeline.toml`.
    pub fn config_path() -> PathBuf {
        env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let cfg = match fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s)
                .map_err(|e| PipelineError::Configuration(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(PipelineError::Configuration(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        cfg.finish()
    }

    pub fn from_toml_str(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Apply env overrides, resolve secrets, validate.
    pub fn finish(mut self) -> Result<Self> {
        self.apply_env()?;
        self.analysis = self.analysis.resolve()?;
        self.pipeline.validate()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_string("DATABASE_PATH") {
            self.database_path = v;
        }
        if let Some(v) = env_string("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env_string("ANALYSIS_PROVIDER") {
            self.analysis.provider = v;
        }
        if let Some(v) = env_string("SLACK_WEBHOOK_URL") {
            self.notify.slack_webhook_url = Some(v);
        }
        if let Some(v) = env_string("DISCORD_WEBHOOK_URL") {
            self.notify.discord_webhook_url = Some(v);
        }
        if let Some(v) = env_parse("PIPELINE_WORKERS")? {
            self.pipeline.workers = v;
        }
        if let Some(v) = env_parse("PIPELINE_BATCH_SIZE")? {
            self.pipeline.batch_size = v;
        }
        if let Some(v) = env_parse("PIPELINE_DEADLINE_SECS")? {
            self.pipeline.deadline_secs = v;
        }
        if let Some(v) = env_parse("PIPELINE_INTERVAL_SECS")? {
            self.pipeline.interval_secs = v;
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::Configuration(format!("{key}='{raw}': {e}"))),
    }
}

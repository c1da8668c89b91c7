// src/analyze/mod.rs
//! Article analysis: the [`AnalysisEngine`] seam plus its concrete providers.

pub mod fixture;
pub mod gemini;
pub mod openai;
pub mod parse;
pub mod prompt;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::analysis::AnalysisSettings;
use crate::error::{PipelineError, Result};

pub use fixture::FixtureEngine;
pub use gemini::GeminiEngine;
pub use openai::OpenAiEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl FromStr for Sentiment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(PipelineError::Structural(format!(
                "unknown sentiment label '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
    Unknown,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
            Impact::Unknown => "unknown",
        }
    }
}

impl FromStr for Impact {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Impact::High),
            "medium" => Ok(Impact::Medium),
            "low" => Ok(Impact::Low),
            "unknown" => Ok(Impact::Unknown),
            other => Err(PipelineError::Structural(format!(
                "unknown impact label '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output of one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Summary in the configured local language.
    pub summary_local: String,
    pub summary_en: String,
    pub sentiment: Sentiment,
    /// Always within `[0, 1]`.
    pub sentiment_score: f64,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub impact: Impact,
    pub analyzed_at: DateTime<Utc>,
    pub processing_ms: u64,
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, title: &str, body: &str) -> Result<AnalysisResult>;
    /// Provider name for logs and metrics labels.
    fn provider_name(&self) -> &'static str;
}

pub type DynEngine = Arc<dyn AnalysisEngine>;

/// Build the engine named by `settings.provider`.
///
/// * `gemini` / `openai` need a resolved API key; a missing one is a
///   configuration error, never a silent fallback.
/// * `fixture` is offline and deterministic.
pub fn build_engine(settings: &AnalysisSettings) -> Result<DynEngine> {
    match settings.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiEngine::new(settings)?)),
        "openai" => Ok(Arc::new(OpenAiEngine::new(settings)?)),
        "fixture" | "mock" => Ok(Arc::new(FixtureEngine::default())),
        other => Err(PipelineError::Configuration(format!(
            "unsupported analysis provider '{other}'"
        ))),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("news-insights/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| PipelineError::Configuration(format!("http client: {e}")))
}

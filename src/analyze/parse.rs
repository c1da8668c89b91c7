//! Parsing of the model's JSON answer into an [`AnalysisResult`].
//!
//! Models like to wrap JSON in markdown fences, so those are stripped first.
//! Six fields are required; `business_impact` is optional and defaults to
//! [`Impact::Unknown`].

use chrono::Utc;
use serde::Deserialize;

use super::{AnalysisResult, Impact, Sentiment};
use crate::error::{PipelineError, Result};

#[derive(Debug, Deserialize)]
struct WireAnalysis {
    #[serde(alias = "summary_jp")]
    summary_local: Option<String>,
    summary_en: Option<String>,
    #[serde(alias = "sentiment")]
    sentiment_label: Option<String>,
    sentiment_score: Option<f64>,
    topics: Option<Vec<String>>,
    #[serde(alias = "entities")]
    key_entities: Option<Vec<String>>,
    #[serde(alias = "impact")]
    business_impact: Option<String>,
}

/// Remove ```json ... ``` (or bare ```) fences and surrounding prose.
pub fn strip_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    let s = s.trim();
    // Fall back to the outermost object if the model added chatter.
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

fn required<T>(field: &'static str, v: Option<T>) -> Result<T> {
    v.ok_or_else(|| PipelineError::Structural(format!("model response missing '{field}'")))
}

pub fn parse_analysis(raw: &str, processing_ms: u64) -> Result<AnalysisResult> {
    let body = strip_fences(raw);
    let wire: WireAnalysis = serde_json::from_str(body)
        .map_err(|e| PipelineError::Structural(format!("model response is not valid JSON: {e}")))?;

    let summary_local = required("summary_local", wire.summary_local)?;
    let summary_en = required("summary_en", wire.summary_en)?;
    let sentiment: Sentiment = required("sentiment_label", wire.sentiment_label)?.parse()?;
    let sentiment_score = required("sentiment_score", wire.sentiment_score)?;
    let topics = required("topics", wire.topics)?;
    let entities = required("key_entities", wire.key_entities)?;

    if !(0.0..=1.0).contains(&sentiment_score) {
        return Err(PipelineError::Structural(format!(
            "sentiment_score {sentiment_score} outside [0, 1]"
        )));
    }

    let impact = match wire.business_impact.as_deref() {
        None => Impact::Unknown,
        Some(s) if s.trim().is_empty() => Impact::Unknown,
        Some(s) => s.parse()?,
    };

    Ok(AnalysisResult {
        summary_local: summary_local.trim().to_string(),
        summary_en: summary_en.trim().to_string(),
        sentiment,
        sentiment_score,
        topics,
        entities,
        impact,
        analyzed_at: Utc::now(),
        processing_ms,
    })
}

//! Offline, deterministic engine for local runs and demos.
//! Sentiment is a crude keyword vote so output varies a little by input.

use async_trait::async_trait;
use chrono::Utc;

use super::{AnalysisEngine, AnalysisResult, Impact, Sentiment};
use crate::error::Result;

const POSITIVE: &[&str] = &["beat", "growth", "record", "surge", "gain", "launch", "win"];
const NEGATIVE: &[&str] = &["loss", "cut", "fall", "crash", "lawsuit", "breach", "layoff"];

#[derive(Debug, Clone, Default)]
pub struct FixtureEngine;

impl FixtureEngine {
    fn score(text: &str) -> (Sentiment, f64) {
        let lower = text.to_lowercase();
        let pos = POSITIVE.iter().filter(|w| lower.contains(*w)).count() as i64;
        let neg = NEGATIVE.iter().filter(|w| lower.contains(*w)).count() as i64;
        match pos - neg {
            d if d > 0 => (Sentiment::Positive, (0.5 + 0.1 * d as f64).min(1.0)),
            d if d < 0 => (Sentiment::Negative, (0.5 + 0.1 * d as f64).max(0.0)),
            _ => (Sentiment::Neutral, 0.5),
        }
    }
}

#[async_trait]
impl AnalysisEngine for FixtureEngine {
    async fn analyze(&self, title: &str, body: &str) -> Result<AnalysisResult> {
        let (sentiment, sentiment_score) = Self::score(&format!("{title} {body}"));
        let summary: String = title.chars().take(200).collect();
        Ok(AnalysisResult {
            summary_local: summary.clone(),
            summary_en: summary,
            sentiment,
            sentiment_score,
            topics: Vec::new(),
            entities: Vec::new(),
            impact: Impact::Unknown,
            analyzed_at: Utc::now(),
            processing_ms: 0,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_vote_drives_sentiment() {
        let e = FixtureEngine;
        let r = e.analyze("Record growth at chipmaker", "").await.unwrap();
        assert_eq!(r.sentiment, Sentiment::Positive);
        assert!((0.0..=1.0).contains(&r.sentiment_score));

        let r = e.analyze("Layoff wave after data breach", "").await.unwrap();
        assert_eq!(r.sentiment, Sentiment::Negative);

        let r = e.analyze("Quarterly update", "").await.unwrap();
        assert_eq!(r.sentiment, Sentiment::Neutral);
    }
}

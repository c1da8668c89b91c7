//! # Health Evaluator
//! Pure, deterministic mapping from store-wide counts to a health status.
//! No I/O; the counts are read by the caller (see `ArticleStore::health_counts`).
//!
//! Thresholds are kept literally: `healthy` needs an error rate below 10% and
//! more than 80% of stored articles analysed; `warning` covers error rates
//! below 25%; everything else is `critical`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HEALTHY_MAX_ERROR_RATE: f64 = 10.0;
pub const HEALTHY_MIN_ANALYSIS_RATE: f64 = 80.0;
pub const WARNING_MAX_ERROR_RATE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    /// Counts could not be read; only produced by [`HealthEvaluator::degraded`].
    Unavailable,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unavailable => "unavailable",
        }
    }
}

/// Raw aggregate counts as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub total_articles: u64,
    pub analyzed_articles: u64,
    pub articles_24h: u64,
    pub successful_analyses_24h: u64,
    pub failed_analyses_24h: u64,
    pub avg_processing_ms_24h: f64,
    /// Sentiment labels over the most recently analysed articles.
    #[serde(default)]
    pub recent_sentiment: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(flatten)]
    pub counts: HealthCounts,
    pub analysis_rate: f64,
    pub error_rate_24h: f64,
    pub health_score: f64,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub taken_at: DateTime<Utc>,
}

pub struct HealthEvaluator;

impl HealthEvaluator {
    /// `analyzed / total * 100`, or 0 for an empty store.
    pub fn analysis_rate(analyzed: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            analyzed as f64 / total as f64 * 100.0
        }
    }

    /// `failures / (successes + failures) * 100`, or 0 with no attempts.
    pub fn error_rate(successes: u64, failures: u64) -> f64 {
        let attempts = successes + failures;
        if attempts == 0 {
            0.0
        } else {
            failures as f64 / attempts as f64 * 100.0
        }
    }

    pub fn health_score(error_rate: f64) -> f64 {
        (100.0 - error_rate).max(0.0)
    }

    pub fn classify(error_rate: f64, analysis_rate: f64) -> HealthStatus {
        if error_rate < HEALTHY_MAX_ERROR_RATE && analysis_rate > HEALTHY_MIN_ANALYSIS_RATE {
            HealthStatus::Healthy
        } else if error_rate < WARNING_MAX_ERROR_RATE {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    pub fn status(counts: &HealthCounts) -> HealthStatus {
        let analysis_rate = Self::analysis_rate(counts.analyzed_articles, counts.total_articles);
        let error_rate =
            Self::error_rate(counts.successful_analyses_24h, counts.failed_analyses_24h);
        Self::classify(error_rate, analysis_rate)
    }

    pub fn evaluate_at(counts: HealthCounts, taken_at: DateTime<Utc>) -> HealthSnapshot {
        let analysis_rate = Self::analysis_rate(counts.analyzed_articles, counts.total_articles);
        let error_rate =
            Self::error_rate(counts.successful_analyses_24h, counts.failed_analyses_24h);
        HealthSnapshot {
            analysis_rate,
            error_rate_24h: error_rate,
            health_score: Self::health_score(error_rate),
            status: Self::classify(error_rate, analysis_rate),
            error: None,
            taken_at,
            counts,
        }
    }

    pub fn evaluate(counts: HealthCounts) -> HealthSnapshot {
        Self::evaluate_at(counts, Utc::now())
    }

    /// Snapshot used when the counts themselves could not be read.
    pub fn degraded(error: impl Into<String>) -> HealthSnapshot {
        HealthSnapshot {
            counts: HealthCounts::default(),
            analysis_rate: 0.0,
            error_rate_24h: 0.0,
            health_score: 0.0,
            status: HealthStatus::Unavailable,
            error: Some(error.into()),
            taken_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(analyzed: u64, total: u64, successes: u64, failures: u64) -> HealthCounts {
        HealthCounts {
            total_articles: total,
            analyzed_articles: analyzed,
            successful_analyses_24h: successes,
            failed_analyses_24h: failures,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_with_low_errors_and_high_coverage() {
        let snap = HealthEvaluator::evaluate(counts(90, 100, 30, 2));
        assert_eq!(snap.status, HealthStatus::Healthy);
        assert!((snap.analysis_rate - 90.0).abs() < 1e-9);
        assert!((snap.error_rate_24h - 6.25).abs() < 1e-9);
        assert!((snap.health_score - 93.75).abs() < 1e-9);
    }

    #[test]
    fn no_attempts_means_zero_error_rate() {
        assert_eq!(HealthEvaluator::error_rate(0, 0), 0.0);
        let snap = HealthEvaluator::evaluate(counts(81, 100, 0, 0));
        assert_eq!(snap.error_rate_24h, 0.0);
        assert_eq!(snap.health_score, 100.0);
        assert_eq!(snap.status, HealthStatus::Healthy);
    }

    #[test]
    fn empty_store_is_warning_not_division_error() {
        let snap = HealthEvaluator::evaluate(counts(0, 0, 0, 0));
        assert_eq!(snap.analysis_rate, 0.0);
        assert_eq!(snap.status, HealthStatus::Warning);
    }

    #[test]
    fn thresholds_are_strict() {
        // analysis_rate must be strictly above 80
        assert_eq!(HealthEvaluator::classify(0.0, 80.0), HealthStatus::Warning);
        // error_rate must be strictly below 10 for healthy
        assert_eq!(HealthEvaluator::classify(10.0, 95.0), HealthStatus::Warning);
        // error_rate 25 is already critical
        assert_eq!(HealthEvaluator::classify(25.0, 95.0), HealthStatus::Critical);
        assert_eq!(HealthEvaluator::classify(24.99, 10.0), HealthStatus::Warning);
    }

    #[test]
    fn all_failures_is_critical_with_zero_score() {
        let snap = HealthEvaluator::evaluate(counts(50, 100, 0, 4));
        assert_eq!(snap.error_rate_24h, 100.0);
        assert_eq!(snap.health_score, 0.0);
        assert_eq!(snap.status, HealthStatus::Critical);
    }

    #[test]
    fn same_inputs_same_status() {
        let c = counts(42, 77, 13, 3);
        let a = HealthEvaluator::status(&c);
        for _ in 0..10 {
            assert_eq!(HealthEvaluator::status(&c), a);
        }
    }

    #[test]
    fn degraded_snapshot_carries_error_marker() {
        let snap = HealthEvaluator::degraded("database is locked");
        assert_eq!(snap.status, HealthStatus::Unavailable);
        assert_eq!(snap.error.as_deref(), Some("database is locked"));
    }
}

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::health::HealthStatus;
use crate::pipeline::{PipelineRun, RunStatus};

/// Flattened view of a run, shared by every notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RunNotification {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub incomplete: bool,
    pub new_articles: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub analysis_skipped: bool,
    pub analyzed: usize,
    pub analysis_failed: usize,
    pub health_status: Option<HealthStatus>,
    pub health_score: Option<f64>,
    pub total_errors: usize,
    /// `"stage: outcome"` per stage that ran so far.
    pub stage_lines: Vec<String>,
}

impl RunNotification {
    pub fn from_run(run: &PipelineRun) -> Self {
        let collection = run.collection.as_ref();
        let analysis = run.analysis.as_ref();
        Self {
            run_id: run.run_id,
            started_at: run.started_at,
            status: run.status,
            incomplete: run.incomplete,
            new_articles: collection.map_or(0, |c| c.new_articles),
            successful_sources: collection.map_or(0, |c| c.successful_sources),
            failed_sources: collection.map_or(0, |c| c.failed_sources),
            analysis_skipped: analysis.is_some_and(|a| a.skipped),
            analyzed: analysis.map_or(0, |a| a.succeeded),
            analysis_failed: analysis.map_or(0, |a| a.failed),
            health_status: run.health_status,
            health_score: run.health.as_ref().map(|h| h.health_score),
            total_errors: run.total_errors,
            stage_lines: run
                .stages
                .iter()
                .map(|s| format!("{}: {}", s.stage.as_str(), s.outcome.label()))
                .collect(),
        }
    }

    pub fn health_label(&self) -> &'static str {
        self.health_status.map_or("n/a", |h| h.as_str())
    }

    pub fn title(&self) -> String {
        format!(
            "News pipeline run {}: {}",
            self.status.as_str(),
            self.health_label()
        )
    }

    /// Multi-line plain-text body (Slack mrkdwn / Discord markdown safe).
    pub fn body(&self) -> String {
        let analysis = if self.analysis_skipped {
            "skipped (no new articles)".to_string()
        } else {
            format!("{} ok, {} failed", self.analyzed, self.analysis_failed)
        };
        let score = self
            .health_score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "n/a".into());
        let mut out = format!(
            "Run: {}\nStarted (UTC): {}\nCollected: {} new from {} sources ({} failed)\nAnalysis: {}\nHealth: {} (score {})\nErrors: {}",
            self.run_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.new_articles,
            self.successful_sources,
            self.failed_sources,
            analysis,
            self.health_label(),
            score,
            self.total_errors,
        );
        if self.incomplete {
            out.push_str("\nDeadline reached before every unit ran");
        }
        if !self.stage_lines.is_empty() {
            out.push_str("\nStages: ");
            out.push_str(&self.stage_lines.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AnalysisReport, CollectReport};

    #[test]
    fn summary_mentions_counts_and_skip() {
        let mut run = PipelineRun::start(Uuid::nil());
        run.collection = Some(CollectReport {
            new_articles: 0,
            successful_sources: 3,
            ..CollectReport::default()
        });
        run.analysis = Some(AnalysisReport::skipped());
        run.health_status = Some(HealthStatus::Warning);

        let n = RunNotification::from_run(&run);
        assert_eq!(n.title(), "News pipeline run succeeded: warning");
        let body = n.body();
        assert!(body.contains("0 new from 3 sources"));
        assert!(body.contains("skipped"));
        assert!(!body.contains("Deadline"));
    }
}

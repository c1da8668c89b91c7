// src/pipeline/mod.rs
//! Run records produced by the orchestrator.
//!
//! A [`PipelineRun`] is built up stage by stage while the run executes and is
//! handed to the caller by value once the last stage has finished.

pub mod orchestrator;
pub mod task_runner;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::health::{HealthSnapshot, HealthStatus};

pub use orchestrator::{PipelineOrchestrator, WebhookOutcome};
pub use task_runner::{Attempt, DelayPolicy, RetryPolicy, TaskRunner, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Collect,
    Analyze,
    HealthCheck,
    Notify,
}

/// Execution order of every run.
pub const STAGES: [StageName; 4] = [
    StageName::Collect,
    StageName::Analyze,
    StageName::HealthCheck,
    StageName::Notify,
];

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Collect => "collect",
            StageName::Analyze => "analyze",
            StageName::HealthCheck => "health_check",
            StageName::Notify => "notify",
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            StageName::Collect => PipelineState::Collecting,
            StageName::Analyze => PipelineState::Analyzing,
            StageName::HealthCheck => PipelineState::HealthChecking,
            StageName::Notify => PipelineState::Notifying,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Collecting,
    Analyzing,
    HealthChecking,
    Notifying,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Skipped { reason: String },
    /// Finished, but some units failed or an input was unavailable.
    Degraded { error: String },
    /// Stage-level operation failed after its retries.
    Failed { error: String },
    /// Deadline passed before every unit was dispatched.
    TimedOut { unscheduled: usize },
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::Skipped { .. } => "skipped",
            StageOutcome::Degraded { .. } => "degraded",
            StageOutcome::Failed { .. } => "failed",
            StageOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub stage: StageName,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    pub error_count: usize,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub attempts: u32,
    pub fetched: usize,
    pub new_articles: usize,
    pub duplicates: usize,
    pub store_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timed_out: bool,
}

impl SourceReport {
    pub fn is_failed(&self) -> bool {
        self.error.is_some() && !self.timed_out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectReport {
    pub new_articles: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub timed_out_sources: usize,
    /// In configuration order.
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleError {
    pub article_id: i64,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub skipped: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Model invocations, retries included.
    pub engine_calls: u32,
    pub sentiment_distribution: BTreeMap<String, usize>,
    pub impact_distribution: BTreeMap<String, usize>,
    pub avg_processing_ms: f64,
    pub errors: Vec<ArticleError>,
}

impl AnalysisReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Degraded,
    Incomplete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Degraded => "degraded",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// In execution order.
    pub stages: Vec<StageRun>,
    pub collection: Option<CollectReport>,
    pub analysis: Option<AnalysisReport>,
    pub health: Option<HealthSnapshot>,
    pub health_status: Option<HealthStatus>,
    pub total_errors: usize,
    pub status: RunStatus,
    pub incomplete: bool,
}

impl PipelineRun {
    pub(crate) fn start(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            stages: Vec::with_capacity(STAGES.len()),
            collection: None,
            analysis: None,
            health: None,
            health_status: None,
            total_errors: 0,
            status: RunStatus::Succeeded,
            incomplete: false,
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRun> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Failed > Incomplete > Degraded > Succeeded. Notification delivery
    /// never changes the status.
    pub fn derive_status(&self) -> RunStatus {
        let counted = self.stages.iter().filter(|s| s.stage != StageName::Notify);
        let mut degraded = false;
        for s in counted {
            match s.outcome {
                StageOutcome::Failed { .. } => return RunStatus::Failed,
                StageOutcome::Degraded { .. } => degraded = true,
                _ if s.error_count > 0 => degraded = true,
                _ => {}
            }
        }
        if self.incomplete {
            RunStatus::Incomplete
        } else if degraded {
            RunStatus::Degraded
        } else {
            RunStatus::Succeeded
        }
    }

    pub(crate) fn refresh(&mut self) {
        self.total_errors = self.stages.iter().map(|s| s.error_count).sum();
        self.status = self.derive_status();
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}

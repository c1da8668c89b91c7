// src/error.rs
//! Error taxonomy shared by every stage of the pipeline.
//!
//! Retry decisions are made from the variant: only `TransientIo` is retried
//! at unit level. Stage-level runners also retry `Persistence` (the store may
//! come back between attempts).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network failure, timeout or rate limit on a feed fetch or model call.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Malformed model response, missing required field, unparsable feed.
    #[error("structural error: {0}")]
    Structural(String),

    /// Store connection failure or rejected statement.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing credential, empty source list, invalid tunable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unit was never dispatched because the run deadline had passed.
    #[error("deadline exceeded before {0} was dispatched")]
    DeadlineExceeded(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientIo(_))
    }

    /// Classification used for whole-stage operations (store reachability,
    /// batch loading).
    pub fn is_retryable_at_stage(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientIo(_) | PipelineError::Persistence(_)
        )
    }

    /// Map a non-2xx HTTP response onto the taxonomy: 429 and 5xx are
    /// transient, any other status is structural.
    pub fn from_status(what: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let msg = format!("{what} returned {status}: {snippet}");
        if status.as_u16() == 429 || status.is_server_error() {
            PipelineError::TransientIo(msg)
        } else {
            PipelineError::Structural(msg)
        }
    }

    /// Short machine-friendly label, used in metrics and per-unit reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TransientIo(_) => "transient_io",
            PipelineError::Structural(_) => "structural",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        // Body decode failures are the remote's fault, not the network's.
        if e.is_decode() {
            return PipelineError::Structural(e.to_string());
        }
        match e.status() {
            Some(s) if s.as_u16() == 429 || s.is_server_error() => {
                PipelineError::TransientIo(e.to_string())
            }
            Some(_) => PipelineError::Structural(e.to_string()),
            None => PipelineError::TransientIo(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Structural(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

//! Bounded-retry execution of a single fallible async operation.
//!
//! A [`RetryPolicy`] is plain data (deserialisable from config), handed to a
//! [`TaskRunner`] together with an optional deadline. The runner never
//! decides *what* is retryable on its own: it asks the classifier it was
//! built with (by default [`PipelineError::is_retryable`]).

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayPolicy {
    Fixed { delay_ms: u64 },
    /// `min(base * 2^(n-1), max)` after the n-th failure.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl DelayPolicy {
    /// Delay to wait after the `failures`-th failed attempt (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            DelayPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            DelayPolicy::Exponential { base_ms, max_ms } => {
                let shift = failures.saturating_sub(1).min(32);
                let ms = base_ms.saturating_mul(1u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: DelayPolicy,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: DelayPolicy::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            delay: DelayPolicy::Exponential {
                base_ms: base.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            },
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timing {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Outcome of a [`TaskRunner::run`] call.
#[derive(Debug)]
pub struct Attempt<T> {
    pub result: Result<T, PipelineError>,
    pub attempts: u32,
    pub timing: Timing,
}

impl<T> Attempt<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaskRunner {
    policy: RetryPolicy,
    deadline: Option<Instant>,
    retryable: fn(&PipelineError) -> bool,
}

impl TaskRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            deadline: None,
            retryable: PipelineError::is_retryable,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn retry_when(mut self, classifier: fn(&PipelineError) -> bool) -> Self {
        self.retryable = classifier;
        self
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let started_at = Utc::now();
        let t0 = Instant::now();
        let max_attempts = self.policy.attempts();
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;
            match op().await {
                Ok(v) => break Ok(v),
                Err(e) => {
                    if attempts >= max_attempts || !(self.retryable)(&e) {
                        break Err(e);
                    }
                    let wait = self.policy.delay.delay_for(attempts);
                    if let Some(deadline) = self.deadline {
                        if Instant::now() + wait >= deadline {
                            tracing::debug!(
                                target: "pipeline",
                                attempts,
                                error = %e,
                                "retry would cross run deadline; giving up"
                            );
                            break Err(e);
                        }
                    }
                    tracing::debug!(
                        target: "pipeline",
                        attempt = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        };

        Attempt {
            result,
            attempts,
            timing: Timing {
                started_at,
                finished_at: Utc::now(),
                duration_ms: t0.elapsed().as_millis() as u64,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delay_doubles_then_caps() {
        let d = DelayPolicy::Exponential {
            base_ms: 100,
            max_ms: 350,
        };
        assert_eq!(d.delay_for(1), Duration::from_millis(100));
        assert_eq!(d.delay_for(2), Duration::from_millis(200));
        assert_eq!(d.delay_for(3), Duration::from_millis(350));
        assert_eq!(d.delay_for(60), Duration::from_millis(350));
    }

    #[test]
    fn zero_attempts_is_treated_as_one() {
        let p = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(p.attempts(), 1);
    }

    #[test]
    fn delay_policy_reads_from_toml() {
        let p: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 3
            delay = { kind = "exponential", base_ms = 500, max_ms = 8000 }
            "#,
        )
        .unwrap();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(
            p.delay,
            DelayPolicy::Exponential {
                base_ms: 500,
                max_ms: 8000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let runner = TaskRunner::new(RetryPolicy::fixed(3, Duration::from_secs(60)));
        let out = runner
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PipelineError::TransientIo("timeout".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(out.result.unwrap(), 2);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_failure() {
        let runner = TaskRunner::new(RetryPolicy::exponential(
            3,
            Duration::from_millis(10),
            Duration::from_millis(40),
        ));
        let calls = AtomicU32::new(0);
        let out: Attempt<()> = runner
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(PipelineError::TransientIo(format!("fail {n}"))) }
            })
            .await;
        assert_eq!(out.attempts, 3);
        match out.result {
            Err(PipelineError::TransientIo(msg)) => assert_eq!(msg, "fail 2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn structural_error_consumes_one_attempt() {
        let runner = TaskRunner::new(RetryPolicy::fixed(5, Duration::from_secs(30)));
        let out: Attempt<()> = runner
            .run(|| async { Err(PipelineError::Structural("bad json".into())) })
            .await;
        assert_eq!(out.attempts, 1);
        assert!(matches!(out.result, Err(PipelineError::Structural(_))));
    }

    #[tokio::test]
    async fn stage_classifier_retries_persistence() {
        let calls = AtomicU32::new(0);
        let runner = TaskRunner::new(RetryPolicy::fixed(2, Duration::from_millis(1)))
            .retry_when(PipelineError::is_retryable_at_stage);
        let out: Attempt<()> = runner
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::Persistence("locked".into())) }
            })
            .await;
        assert_eq!(out.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_stops_retry_early() {
        let runner = TaskRunner::new(RetryPolicy::fixed(5, Duration::from_secs(60)))
            .with_deadline(Instant::now() + Duration::from_secs(1));
        let out: Attempt<()> = runner
            .run(|| async { Err(PipelineError::TransientIo("reset".into())) })
            .await;
        assert_eq!(out.attempts, 1);
        assert!(out.timing.duration_ms < 1_000);
    }
}

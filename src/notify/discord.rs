use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;

use super::{Notifier, RunNotification};
use crate::error::PipelineError;
use crate::pipeline::{RetryPolicy, RunStatus, TaskRunner};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(4)),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(&self, payload: &DiscordWebhookPayload) -> Result<(), PipelineError> {
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(PipelineError::from_status("discord webhook", status, &body));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, n: &RunNotification) -> Result<()> {
        let payload = DiscordWebhookPayload::embed(&n.title(), &n.body(), colour_for(n.status));
        let attempt = TaskRunner::new(self.retry)
            .run(|| self.post_once(&payload))
            .await;
        let attempts = attempt.attempts;
        attempt
            .result
            .map_err(|e| anyhow!("Discord webhook failed after {attempts} attempt(s): {e}"))
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

fn colour_for(status: RunStatus) -> u32 {
    match status {
        RunStatus::Succeeded => 0x2E_CC_71,
        RunStatus::Degraded | RunStatus::Incomplete => 0xF1_C4_0F,
        RunStatus::Failed => 0xE7_4C_3C,
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(title: &str, description: &str, color: u32) -> Self {
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description: description.to_string(),
                color,
            }],
        }
    }
}

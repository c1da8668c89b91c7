use anyhow::{Context, Result};
use reqwest::Client;

use super::{Notifier, RunNotification};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
        }
    }

    pub fn payload(n: &RunNotification) -> serde_json::Value {
        serde_json::json!({ "text": format!("*{}*\n{}", n.title(), n.body()) })
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, n: &RunNotification) -> Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&Self::payload(n))
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineRun, RunStatus};

    #[test]
    fn payload_bolds_title_above_body() {
        let mut run = PipelineRun::start(uuid::Uuid::nil());
        run.status = RunStatus::Failed;
        let v = SlackNotifier::payload(&RunNotification::from_run(&run));
        let text = v["text"].as_str().unwrap();
        assert!(text.starts_with("*News pipeline run failed: n/a*\n"));
        assert!(text.contains("Errors: 0"));
    }
}

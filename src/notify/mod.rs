// src/notify/mod.rs
//! Run notifications: one summary per run, fanned out to every configured
//! channel. Delivery failures are reported back to the caller but never
//! raised.

pub mod discord;
pub mod slack;
pub mod summary;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::NotifySettings;
use crate::pipeline::RunStatus;

pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;
pub use summary::RunNotification;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, n: &RunNotification) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Writes the summary to the log; always present.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, n: &RunNotification) -> Result<()> {
        tracing::info!(
            target: "notify",
            run_id = %n.run_id,
            status = n.status.as_str(),
            health = n.health_label(),
            new_articles = n.new_articles,
            analyzed = n.analyzed,
            errors = n.total_errors,
            "{}",
            n.title()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
    /// Remote channels were not contacted (successful run, success posts off).
    pub quiet: bool,
}

pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
    notify_on_success: bool,
}

impl Default for NotifierMux {
    fn default() -> Self {
        Self::log_only()
    }
}

impl NotifierMux {
    pub fn empty() -> Self {
        Self {
            notifiers: Vec::new(),
            notify_on_success: true,
        }
    }

    pub fn log_only() -> Self {
        Self::empty().with(LogNotifier)
    }

    /// Log channel plus Slack / Discord when their webhook URLs are set.
    pub fn from_settings(settings: &NotifySettings) -> Self {
        let mut mux = Self::log_only();
        mux.notify_on_success = settings.notify_on_success;
        if let Some(url) = settings.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            mux = mux.with(SlackNotifier::new(url.to_string()));
        }
        if let Some(url) = settings.discord_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            mux = mux.with(DiscordNotifier::new(url.to_string()));
        }
        mux
    }

    pub fn with(mut self, n: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(n));
        self
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub async fn notify(&self, n: &RunNotification) -> DeliveryReport {
        let mut report = DeliveryReport {
            quiet: !self.notify_on_success && n.status == RunStatus::Succeeded,
            ..DeliveryReport::default()
        };
        for notifier in &self.notifiers {
            if report.quiet && notifier.name() != "log" {
                continue;
            }
            match notifier.send(n).await {
                Ok(()) => report.delivered.push(notifier.name()),
                Err(e) => {
                    tracing::warn!(target: "notify", channel = notifier.name(), error = ?e, "notification failed");
                    report.failed.push((notifier.name(), format!("{e:#}")));
                }
            }
        }
        report
    }
}

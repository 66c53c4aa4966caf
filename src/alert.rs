use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Backfill for a pair exhausted its attempts.
    UpdateFailure,
    /// Stored data has calendar gaps in the trailing year.
    IncompleteData,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::UpdateFailure => "update_failure",
            AlertKind::IncompleteData => "incomplete_data",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert delivery port. Fire-and-forget: delivery problems are handled inside
/// the sink and never reach the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert_type: &str, message: &str);
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    alert_type: &'a str,
    message: &'a str,
}

/// Logs every alert and, when enabled, POSTs it as JSON to a webhook.
pub struct AlertMonitor {
    enabled: bool,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl AlertMonitor {
    pub fn new(enabled: bool, webhook_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { enabled, webhook_url, client })
    }

    /// Webhook to deliver to, if delivery is switched on.
    fn delivery_url(&self) -> Option<&str> {
        if self.enabled {
            self.webhook_url.as_deref()
        } else {
            None
        }
    }

    async fn post(&self, url: &str, alert_type: &str, message: &str) -> Result<()> {
        self.client
            .post(url)
            .json(&WebhookPayload { alert_type, message })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AlertSink for AlertMonitor {
    async fn send(&self, alert_type: &str, message: &str) {
        warn!(alert_type, "ALERT | {message}");

        let Some(url) = self.delivery_url() else {
            return;
        };
        match self.post(url, alert_type, message).await {
            Ok(()) => info!(alert_type, "alert delivered to webhook"),
            Err(e) => warn!(alert_type, "alert webhook delivery failed: {e}"),
        }
    }
}

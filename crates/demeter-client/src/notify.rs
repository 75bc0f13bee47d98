use std::time::Duration;

use demeter_core::error::HarvestError;
use demeter_core::traits::{ComputeWaker, LogNotifier, Notifier, NoopWaker};
use reqwest::Client;
use serde_json::json;

fn client(timeout: Duration) -> Result<Client, HarvestError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HarvestError::Http(e.to_string()))
}

/// Posts operator notifications to a Slack-compatible incoming webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, HarvestError> {
        Ok(Self {
            client: client(Duration::from_secs(10))?,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), HarvestError> {
        let payload = json!({ "text": format!("*{subject}*\n{body}") });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HarvestError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Notification(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

/// Asks the platform to start worker compute by POSTing to a fixed URL.
#[derive(Clone)]
pub struct HttpWaker {
    client: Client,
    url: String,
}

impl HttpWaker {
    pub fn new(url: impl Into<String>) -> Result<Self, HarvestError> {
        Ok(Self {
            client: client(Duration::from_secs(30))?,
            url: url.into(),
        })
    }
}

impl ComputeWaker for HttpWaker {
    async fn wake(&self) -> Result<(), HarvestError> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| HarvestError::Http(format!("Wake request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Http(format!(
                "Wake request returned HTTP {}",
                status.as_u16()
            )));
        }
        tracing::info!(url = %self.url, "Compute wake requested");
        Ok(())
    }
}

/// Notifier selected from `DEMETER_NOTIFY_WEBHOOK`: the webhook when set,
/// the log otherwise.
#[derive(Clone)]
pub enum OperatorNotifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl OperatorNotifier {
    pub fn from_env() -> Result<Self, HarvestError> {
        match std::env::var("DEMETER_NOTIFY_WEBHOOK") {
            Ok(url) if !url.trim().is_empty() => Ok(Self::Webhook(WebhookNotifier::new(url)?)),
            _ => Ok(Self::Log(LogNotifier)),
        }
    }
}

impl Notifier for OperatorNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), HarvestError> {
        match self {
            Self::Log(n) => n.notify(subject, body).await,
            Self::Webhook(n) => n.notify(subject, body).await,
        }
    }
}

/// Waker selected from `DEMETER_WAKE_URL`; a no-op when unset.
#[derive(Clone)]
pub enum PlatformWaker {
    Noop(NoopWaker),
    Http(HttpWaker),
}

impl PlatformWaker {
    pub fn from_env() -> Result<Self, HarvestError> {
        match std::env::var("DEMETER_WAKE_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(Self::Http(HttpWaker::new(url)?)),
            _ => Ok(Self::Noop(NoopWaker)),
        }
    }
}

impl ComputeWaker for PlatformWaker {
    async fn wake(&self) -> Result<(), HarvestError> {
        match self {
            Self::Noop(w) => w.wake().await,
            Self::Http(w) => w.wake().await,
        }
    }
}

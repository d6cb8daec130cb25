//! Failure alerts sent when a run ends with failed items.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::error::{Result, SyncError};
use crate::state::ProcessCounts;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureAlert {
    pub recipient: String,
    pub resource: String,
    pub subject: String,
    pub body: String,
    pub counts: ProcessCounts,
}

impl FailureAlert {
    pub fn new(recipient: &str, resource: &str, label: &str, counts: ProcessCounts) -> Self {
        Self {
            recipient: recipient.to_string(),
            resource: resource.to_string(),
            subject: format!("Sync Failed: {}", label),
            body: format!(
                "The {} sync had {} failures. [Success: {}, Skip: {}, Fail: {}]",
                label, counts.fail, counts.success, counts.skip, counts.fail
            ),
            counts,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &FailureAlert) -> Result<()>;
}

/// Writes alerts to the error log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &FailureAlert) -> Result<()> {
        error!(
            recipient = %alert.recipient,
            resource = %alert.resource,
            subject = %alert.subject,
            "{}",
            alert.body
        );
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &FailureAlert) -> Result<()> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                message: format!("webhook returned {}: {}", status, body),
            });
        }
        info!("Failure alert for {} delivered to webhook", alert.resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn counts() -> ProcessCounts {
        ProcessCounts {
            success: 4,
            skip: 0,
            fail: 1,
        }
    }

    #[test]
    fn alert_text() {
        let alert = FailureAlert::new("ops@example.com", "people", "People", counts());
        assert_eq!(alert.subject, "Sync Failed: People");
        assert_eq!(
            alert.body,
            "The People sync had 1 failures. [Success: 4, Skip: 0, Fail: 1]"
        );
    }

    #[tokio::test]
    async fn webhook_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_partial_json(serde_json::json!({"subject": "Sync Failed: People"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/alerts", server.uri())).unwrap();
        let alert = FailureAlert::new("ops@example.com", "people", "People", counts());
        notifier.notify(&alert).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        let alert = FailureAlert::new("ops", "people", "People", counts());
        assert!(notifier.notify(&alert).await.is_err());
    }
}

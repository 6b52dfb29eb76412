//! Operator alerting.
//!
//! Alerts are fire-and-forget: a notifier never returns an error, it logs
//! its own failures instead.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

/// One operator notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
}

impl Alert {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert);
}

/// Upper bound on one webhook request, connect through response body.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts alerts as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(url, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: Alert) {
        let resp = self.client.post(&self.url).json(&alert).send().await;
        match resp {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!(
                    subject = %alert.subject,
                    status = ?status,
                    response = %body,
                    "Alert webhook rejected notification"
                );
            }
            Err(e) => {
                error!(subject = %alert.subject, error = %e, "Failed to send alert");
            }
        }
    }
}

/// Writes alerts to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: Alert) {
        warn!(subject = %alert.subject, message = %alert.message, "Operator alert");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_serializes_subject_and_message() {
        let alert = Alert::new("Reply Handler: Sender Not Found", "details");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["subject"], "Reply Handler: Sender Not Found");
        assert_eq!(json["message"], "details");
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_panic() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/alerts").unwrap();
        notifier.notify(Alert::new("subject", "message")).await;
    }

    #[tokio::test]
    async fn stalled_webhook_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = WebhookNotifier::with_timeout(
            format!("http://{addr}/alerts"),
            Duration::from_millis(200),
        )
        .unwrap();
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            notifier.notify(Alert::new("subject", "message")),
        )
        .await;
        assert!(finished.is_ok(), "notify hung on a stalled webhook");

        server.abort();
    }
}

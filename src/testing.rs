//! Test doubles for the mail transport and alerting seams.
//!
//! `MockTransport` replays scripted send results; `RecordingNotifier`
//! captures alerts. Both are deterministic and never touch the network.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::delivery::{MailTransport, SendError, SendErrorCode};
use crate::notify::{Alert, Notifier};
use crate::pipeline::types::OutboundMessage;

/// A transport that returns pre-configured results.
///
/// Results are popped from a FIFO queue. When the queue is empty the send
/// succeeds. Every attempted message is recorded.
#[derive(Default)]
pub struct MockTransport {
    results: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that fails every attempt with `code`.
    pub fn always_failing(code: SendErrorCode, attempts: usize) -> Self {
        let results = (0..attempts)
            .map(|_| Err(SendError::new(code.clone(), "scripted failure")))
            .collect();
        Self {
            results: Arc::new(Mutex::new(results)),
            sent: Arc::default(),
        }
    }

    pub async fn push_result(&self, result: Result<(), SendError>) {
        self.results.lock().await.push_back(result);
    }

    /// Every message passed to `send`, including failed attempts.
    pub async fn attempts(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        self.sent.lock().await.push(message.clone());
        self.results.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

/// A notifier that keeps every alert.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .await
            .iter()
            .map(|a| a.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: Alert) {
        self.alerts.lock().await.push(alert);
    }
}

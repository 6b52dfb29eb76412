//! Retrying delivery with escalation on exhaustion.
//!
//! Each attempt waits its scheduled delay, then sends. A retryable failure
//! moves on to the next delay; any other failure stops immediately. When
//! the loop ends without a success the operator is alerted once and the
//! error is returned so the queue can redeliver or dead-letter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::transport::{MailTransport, SendError, SendErrorCode};
use crate::error::DeliveryError;
use crate::notify::{Alert, Notifier};
use crate::pipeline::types::OutboundMessage;

/// Delay before each attempt, in seconds.
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 4] = [0, 5, 30, 120];

/// Delays between attempts plus the codes worth retrying.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    retryable: HashSet<SendErrorCode>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            default_retryable_codes(),
        )
    }
}

impl RetrySchedule {
    /// An empty delay list still allows one immediate attempt.
    pub fn new(delays: Vec<Duration>, retryable: HashSet<SendErrorCode>) -> Self {
        let delays = if delays.is_empty() {
            vec![Duration::ZERO]
        } else {
            delays
        };
        Self { delays, retryable }
    }

    /// `attempts` tries with no waiting, and the default retryable codes.
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts], default_retryable_codes())
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn is_retryable(&self, code: &SendErrorCode) -> bool {
        self.retryable.contains(code)
    }
}

fn default_retryable_codes() -> HashSet<SendErrorCode> {
    HashSet::from([
        SendErrorCode::MailFromDomainNotVerified,
        SendErrorCode::Throttling,
        SendErrorCode::ServiceUnavailable,
    ])
}

/// Message class being delivered. The policy is identical; only log
/// events and the escalation subject differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Acknowledgements and forwards to the private mailbox.
    Forward,
    /// Replies back to the original sender.
    Reply,
}

impl DeliveryKind {
    pub fn alert_subject(self) -> &'static str {
        match self {
            Self::Forward => "Forward Sender: Send Failed After Retries",
            Self::Reply => "Reply Sender: Send Failed After Retries",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reply => "reply",
        }
    }
}

/// Sends outbound messages under a retry schedule.
#[derive(Clone)]
pub struct Deliverer {
    transport: Arc<dyn MailTransport>,
    notifier: Arc<dyn Notifier>,
    schedule: RetrySchedule,
}

impl Deliverer {
    pub fn new(transport: Arc<dyn MailTransport>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport,
            notifier,
            schedule: RetrySchedule::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Deliver one message. Returns the number of attempts used.
    pub async fn send_with_retry(
        &self,
        kind: DeliveryKind,
        message: &OutboundMessage,
    ) -> Result<usize, DeliveryError> {
        let max_attempts = self.schedule.max_attempts();
        let mut attempts = 0;
        let mut last_error = None;

        for delay in self.schedule.delays() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            attempts += 1;

            match self.transport.send(message).await {
                Ok(()) => {
                    info!(
                        kind = kind.label(),
                        recipient = %message.recipient,
                        subject = %message.subject,
                        attempt = attempts,
                        "Email sent"
                    );
                    return Ok(attempts);
                }
                Err(e) if self.schedule.is_retryable(&e.code) => {
                    warn!(
                        kind = kind.label(),
                        recipient = %message.recipient,
                        attempt = attempts,
                        max_attempts,
                        code = %e.code,
                        error = %e.message,
                        "Retryable send failure"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(
                        kind = kind.label(),
                        recipient = %message.recipient,
                        attempt = attempts,
                        code = %e.code,
                        error = %e.message,
                        "Non-retryable send failure"
                    );
                    last_error = Some(e);
                    break;
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| {
            SendError::new(
                SendErrorCode::Other("NoAttempts".into()),
                "no delivery attempts were made",
            )
        });

        error!(
            kind = kind.label(),
            recipient = %message.recipient,
            attempts,
            error = %last_error,
            "Delivery failed after retries"
        );
        self.notifier
            .notify(Alert::new(
                kind.alert_subject(),
                format!(
                    "Failed to send email to {} after {} attempt(s).\nSubject: {}\nLast error: {}",
                    message.recipient, attempts, message.subject, last_error
                ),
            ))
            .await;

        Err(DeliveryError::Exhausted {
            recipient: message.recipient.clone(),
            attempts,
            last_error,
        })
    }
}

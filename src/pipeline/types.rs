//! Shared types for the relay pipeline.

use serde::{Deserialize, Serialize};

// ── Receipt events ──────────────────────────────────────────────────

/// Status reported by the receiving mail provider for a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanVerdict {
    #[default]
    Pass,
    Fail,
    Gray,
    ProcessingFailed,
    #[serde(other)]
    Unknown,
}

impl ScanVerdict {
    pub fn is_fail(self) -> bool {
        self == Self::Fail
    }
}

/// Notification that a raw message has been staged for processing.
///
/// The raw bytes live at `staging/<message_id>` in object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEvent {
    /// Provider-assigned message id.
    pub message_id: String,
    /// Envelope sender.
    pub source: String,
    /// Envelope recipients, in the order the provider reported them.
    #[serde(default)]
    pub destination: Vec<String>,
    #[serde(default)]
    pub spam_verdict: ScanVerdict,
    #[serde(default)]
    pub virus_verdict: ScanVerdict,
}

// ── Queue messages ──────────────────────────────────────────────────

/// Queue names used by the relay.
pub mod queues {
    pub const ACKNOWLEDGEMENTS: &str = "acknowledgements";
    pub const FORWARDS: &str = "forwards";
    pub const REPLIES: &str = "replies";
    pub const ATTACHMENTS: &str = "attachments";
}

/// A message waiting on a delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// A saved attachment waiting for text extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentEvent {
    pub key: String,
}

// ── Step isolation ──────────────────────────────────────────────────

/// How the orchestrator reacts when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the unit of work and surface the error.
    Abort,
    /// Log, send one operator alert, then continue.
    AlertAndContinue,
    /// Log, then continue.
    LogAndContinue,
}

/// A named orchestration step with its failure policy.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub name: &'static str,
    pub policy: FailurePolicy,
    /// Alert subject, used with `FailurePolicy::AlertAndContinue`.
    pub alert_subject: &'static str,
}

impl Step {
    pub const fn abort(name: &'static str) -> Self {
        Self {
            name,
            policy: FailurePolicy::Abort,
            alert_subject: "",
        }
    }

    pub const fn alerted(name: &'static str, alert_subject: &'static str) -> Self {
        Self {
            name,
            policy: FailurePolicy::AlertAndContinue,
            alert_subject,
        }
    }

    pub const fn best_effort(name: &'static str) -> Self {
        Self {
            name,
            policy: FailurePolicy::LogAndContinue,
            alert_subject: "",
        }
    }
}

/// What happened to a step that did not abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Recovered { error: String },
}

/// Per-step record kept in a processing report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: &'static str,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// At most the first `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_event_defaults_verdicts() {
        let json = r#"{"message_id":"m1","source":"a@b.com","destination":["contact@relay.dev"]}"#;
        let event: ReceiptEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.spam_verdict, ScanVerdict::Pass);
        assert!(!event.virus_verdict.is_fail());
    }

    #[test]
    fn unknown_verdict_is_not_fail() {
        let json = r#"{"message_id":"m1","source":"a@b.com","spam_verdict":"DISABLED","virus_verdict":"FAIL"}"#;
        let event: ReceiptEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.spam_verdict, ScanVerdict::Unknown);
        assert!(event.virus_verdict.is_fail());
        assert!(event.destination.is_empty());
    }

    #[test]
    fn outbound_message_omits_missing_reply_to() {
        let msg = OutboundMessage {
            recipient: "a@b.com".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
            reply_to: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("reply_to").is_none());
        assert_eq!(json["recipient"], "a@b.com");
    }

    #[test]
    fn outbound_message_reads_reply_to() {
        let json = r#"{"recipient":"me@private.dev","subject":"Fwd: Hi","body":"x","reply_to":"a-at-b.com@thread.relay.dev"}"#;
        let msg: OutboundMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.reply_to.as_deref(), Some("a-at-b.com@thread.relay.dev"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn step_record_serializes_flat() {
        let record = StepRecord {
            step: "ack_enqueue",
            outcome: StepOutcome::Recovered {
                error: "queue down".into(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["step"], "ack_enqueue");
        assert_eq!(json["outcome"], "recovered");
        assert_eq!(json["error"], "queue down");
    }
}

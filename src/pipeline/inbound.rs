//! Inbound orchestrator: staged message in, forward/ack/archive out.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::identity;
use crate::notify::{Alert, Notifier};
use crate::pipeline::commands::metadata_footer;
use crate::pipeline::message::{self, ParsedMessage};
use crate::pipeline::rules::{Envelope, SpamClassifier, SpamReason};
use crate::pipeline::steps::StepRunner;
use crate::pipeline::types::{
    AttachmentEvent, OutboundMessage, ReceiptEvent, Step, StepRecord, queues, truncate_chars,
};
use crate::pipeline::{LOG_PREVIEW_CHARS, RelayAddresses, enqueue_json};
use crate::storage::{BlobStore, keys};
use crate::store::{Conversations, WorkQueue};

pub const DEFAULT_INBOUND_SUBJECT: &str = "(no subject)";
pub const ACK_SUBJECT: &str = "Thank you for reaching out";

const FETCH_STAGED: Step = Step::abort("fetch_staged");
const PARSE: Step = Step::abort("parse");
const QUARANTINE: Step = Step::best_effort("quarantine_spam");
const ACK_ENQUEUE: Step = Step::alerted("ack_enqueue", "Inbound Handler: Ack Enqueue Failed");
const FORWARD_ENQUEUE: Step =
    Step::alerted("forward_enqueue", "Inbound Handler: Forward Enqueue Failed");
const CONVERSATION_UPSERT: Step = Step::alerted(
    "conversation_upsert",
    "Inbound Handler: Conversation Store Failed",
);
const ARCHIVE: Step = Step::abort("archive");
const ATTACHMENT_SAVE: Step = Step::best_effort("attachment_save");
const ATTACHMENT_EVENT: Step = Step::best_effort("attachment_event_enqueue");
const DELETE_STAGED: Step = Step::abort("delete_staged");

const UNHANDLED_SUBJECT: &str = "Inbound Handler: Unhandled Exception";

/// How an inbound message ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InboundOutcome {
    Spam {
        reason: String,
        quarantine_key: String,
    },
    Processed {
        conversation_id: String,
        first_contact: bool,
        attachments_saved: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundReport {
    pub message_id: String,
    #[serde(flatten)]
    pub outcome: InboundOutcome,
    pub steps: Vec<StepRecord>,
}

/// Processes newly received mail for the public address.
pub struct InboundProcessor {
    addresses: RelayAddresses,
    ack_body: String,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn WorkQueue>,
    conversations: Conversations,
    classifier: Arc<SpamClassifier>,
    notifier: Arc<dyn Notifier>,
}

impl InboundProcessor {
    pub fn new(
        addresses: RelayAddresses,
        ack_body: impl Into<String>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn WorkQueue>,
        conversations: Conversations,
        classifier: Arc<SpamClassifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            addresses,
            ack_body: ack_body.into(),
            blobs,
            queue,
            conversations,
            classifier,
            notifier,
        }
    }

    /// Process one receipt event.
    ///
    /// An error means the staged message was left in place and the whole
    /// unit should be retried; the operator has already been alerted.
    pub async fn process(&self, event: &ReceiptEvent) -> Result<InboundReport, PipelineError> {
        match self.run(event).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(message_id = %event.message_id, error = %e, "Inbound handler failed");
                self.notifier
                    .notify(Alert::new(
                        UNHANDLED_SUBJECT,
                        format!("Unhandled exception: {e}"),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn run(&self, event: &ReceiptEvent) -> Result<InboundReport, PipelineError> {
        let mut steps = StepRunner::new(self.notifier.as_ref());
        let message_id = event.message_id.as_str();
        let sender = event.source.as_str();
        let staging_key = keys::staging(message_id);

        let raw = steps.require(FETCH_STAGED, self.blobs.get(&staging_key)).await?;
        let parsed = steps
            .require(
                PARSE,
                std::future::ready(message::parse(&raw).ok_or_else(|| PipelineError::Parse {
                    message_id: message_id.to_string(),
                })),
            )
            .await?;
        let subject = parsed.subject_or(DEFAULT_INBOUND_SUBJECT);

        let verdict = self
            .classifier
            .classify(&Envelope {
                spam_verdict: event.spam_verdict,
                virus_verdict: event.virus_verdict,
                destination: &event.destination,
                sender_domain: identity::email_domain(sender),
                subject,
                body: &parsed.body,
            })
            .await;

        if let Some(reason) = verdict {
            let quarantine_key = self
                .quarantine(&mut steps, event, &raw, subject, &reason)
                .await;
            steps
                .require(DELETE_STAGED, self.blobs.delete(&staging_key))
                .await?;
            return Ok(InboundReport {
                message_id: message_id.to_string(),
                outcome: InboundOutcome::Spam {
                    reason: reason.to_string(),
                    quarantine_key,
                },
                steps: steps.into_records(),
            });
        }

        let display_name = parsed.display_name.as_deref();
        let conversation_id = identity::resolve(sender, display_name);

        info!(
            sender,
            recipient = event.destination.first().map(String::as_str).unwrap_or_default(),
            subject,
            body_preview = truncate_chars(&parsed.body, LOG_PREVIEW_CHARS),
            conversation_id = %conversation_id,
            display_name,
            "Email received"
        );

        let first_contact = self
            .conversations
            .is_first_contact(&conversation_id)
            .await;

        if first_contact {
            let ack = OutboundMessage {
                recipient: sender.to_string(),
                subject: ACK_SUBJECT.to_string(),
                body: self.ack_body.clone(),
                reply_to: None,
            };
            let context = format!("Failed to enqueue acknowledgement for {sender}");
            if steps
                .attempt(
                    ACK_ENQUEUE,
                    &context,
                    enqueue_json(self.queue.as_ref(), queues::ACKNOWLEDGEMENTS, &ack),
                )
                .await
                .is_some()
            {
                info!(recipient = sender, subject, "Acknowledgement enqueued");
            }
        }

        let forward = self.forward_message(sender, subject, &parsed.body, &conversation_id);
        let context = format!("Failed to enqueue forward for {sender}");
        if steps
            .attempt(
                FORWARD_ENQUEUE,
                &context,
                enqueue_json(self.queue.as_ref(), queues::FORWARDS, &forward),
            )
            .await
            .is_some()
        {
            info!(
                sender,
                conversation_id = %conversation_id,
                subject,
                body_preview = truncate_chars(&parsed.body, LOG_PREVIEW_CHARS),
                "Forward enqueued"
            );
        }

        let context = format!("Failed to store conversation {conversation_id}");
        steps
            .attempt(
                CONVERSATION_UPSERT,
                &context,
                self.conversations.upsert(
                    &conversation_id,
                    sender,
                    subject,
                    &parsed.body,
                    display_name,
                ),
            )
            .await;

        let archive_key = keys::conversation_message(&conversation_id, message_id);
        steps.require(ARCHIVE, self.blobs.put(&archive_key, &raw)).await?;

        let attachments_saved = self
            .save_attachments(&mut steps, &parsed, &conversation_id, message_id)
            .await;

        steps
            .require(DELETE_STAGED, self.blobs.delete(&staging_key))
            .await?;

        Ok(InboundReport {
            message_id: message_id.to_string(),
            outcome: InboundOutcome::Processed {
                conversation_id,
                first_contact,
                attachments_saved,
            },
            steps: steps.into_records(),
        })
    }

    /// Copy for the private mailbox, with replies routed to the thread
    /// address and a metadata footer appended.
    fn forward_message(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
        conversation_id: &str,
    ) -> OutboundMessage {
        let reply_to = self.addresses.thread_address(conversation_id);
        let footer = metadata_footer(&reply_to, sender, conversation_id);
        OutboundMessage {
            recipient: self.addresses.private_email.clone(),
            subject: format!("Fwd: {subject}"),
            body: format!("{body}{footer}"),
            reply_to: Some(reply_to),
        }
    }

    async fn quarantine(
        &self,
        steps: &mut StepRunner<'_>,
        event: &ReceiptEvent,
        raw: &[u8],
        subject: &str,
        reason: &SpamReason,
    ) -> String {
        let now = Utc::now();
        let key = keys::spam(now.date_naive(), &event.message_id);
        let context = format!("Failed to store spam message {}", event.message_id);
        steps
            .attempt(QUARANTINE, &context, self.blobs.put(&key, raw))
            .await;

        info!(
            target: "spam",
            timestamp = %now.to_rfc3339(),
            sender = %event.source,
            subject,
            reason = %reason,
            message_id = %event.message_id,
            "Spam detected"
        );
        key
    }

    /// Save PDF/DOCX attachments and queue them for text extraction.
    async fn save_attachments(
        &self,
        steps: &mut StepRunner<'_>,
        parsed: &ParsedMessage,
        conversation_id: &str,
        message_id: &str,
    ) -> usize {
        let mut saved = 0;
        for attachment in &parsed.attachments {
            if !keys::is_extractable_attachment(&attachment.filename) {
                continue;
            }
            let key = keys::attachment(conversation_id, message_id, &attachment.filename);
            let context = format!("Failed to save attachment {}", attachment.filename);
            if steps
                .attempt(ATTACHMENT_SAVE, &context, self.blobs.put(&key, &attachment.data))
                .await
                .is_none()
            {
                continue;
            }
            info!(key = %key, "Attachment saved");
            saved += 1;

            let event = AttachmentEvent { key: key.clone() };
            let context = format!("Failed to queue extraction for {key}");
            steps
                .attempt(
                    ATTACHMENT_EVENT,
                    &context,
                    enqueue_json(self.queue.as_ref(), queues::ATTACHMENTS, &event),
                )
                .await;
        }
        saved
    }
}

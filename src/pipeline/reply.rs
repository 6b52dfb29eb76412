//! Reply orchestrator: the operator's reply to a thread address goes back
//! to the original sender.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{DatabaseError, PipelineError};
use crate::notify::{Alert, Notifier};
use crate::pipeline::commands::{clean_body, extract_commands};
use crate::pipeline::message;
use crate::pipeline::steps::StepRunner;
use crate::pipeline::types::{
    OutboundMessage, ReceiptEvent, Step, StepRecord, queues, truncate_chars,
};
use crate::pipeline::{LOG_PREVIEW_CHARS, enqueue_json};
use crate::storage::{BlobStore, keys};
use crate::store::{Conversations, WorkQueue};

pub const DEFAULT_REPLY_SUBJECT: &str = "Re: Your message";

const FETCH_STAGED: Step = Step::abort("fetch_staged");
const PARSE: Step = Step::abort("parse");
const METADATA_MERGE: Step =
    Step::alerted("metadata_merge", "Reply Handler: Metadata Update Failed");
const REPLY_ENQUEUE: Step = Step::abort("reply_enqueue");
const ARCHIVE: Step = Step::abort("archive");
const DELETE_STAGED: Step = Step::abort("delete_staged");

const SENDER_NOT_FOUND_SUBJECT: &str = "Reply Handler: Sender Not Found";
const UNHANDLED_SUBJECT: &str = "Reply Handler: Unhandled Exception";

/// How a reply ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Enqueued {
        conversation_id: String,
        recipient: String,
        metadata_keys: Vec<String>,
    },
    /// No conversation for the thread address; the staged reply is left alone.
    SenderNotFound { conversation_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyReport {
    pub message_id: String,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
    pub steps: Vec<StepRecord>,
}

/// Conversation id encoded in a thread address (`<id>@thread.<domain>`).
pub fn conversation_id_from_thread_address(address: &str) -> &str {
    address
        .split_once('@')
        .map(|(local, _)| local)
        .unwrap_or(address)
}

/// Routes operator replies back into their conversation.
pub struct ReplyProcessor {
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn WorkQueue>,
    conversations: Conversations,
    notifier: Arc<dyn Notifier>,
}

impl ReplyProcessor {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn WorkQueue>,
        conversations: Conversations,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            blobs,
            queue,
            conversations,
            notifier,
        }
    }

    /// Process one reply receipt. Errors are alerted and returned so the
    /// unit can be retried.
    pub async fn process(&self, event: &ReceiptEvent) -> Result<ReplyReport, PipelineError> {
        match self.run(event).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(message_id = %event.message_id, error = %e, "Reply handler failed");
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

    async fn run(&self, event: &ReceiptEvent) -> Result<ReplyReport, PipelineError> {
        let mut steps = StepRunner::new(self.notifier.as_ref());
        let message_id = event.message_id.as_str();

        let thread_address = event
            .destination
            .first()
            .ok_or(PipelineError::MissingDestination)?;
        let conversation_id = conversation_id_from_thread_address(thread_address);

        let lookup = self.conversations.lookup_sender_email(conversation_id).await;
        let original_sender = match lookup {
            Ok(Some(sender)) => sender,
            Ok(None) => {
                return Ok(self
                    .sender_not_found(message_id, conversation_id, thread_address, None)
                    .await);
            }
            Err(e) => {
                return Ok(self
                    .sender_not_found(message_id, conversation_id, thread_address, Some(&e))
                    .await);
            }
        };

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
        let subject = parsed.subject_or(DEFAULT_REPLY_SUBJECT);

        info!(
            conversation_id,
            recipient = %original_sender,
            subject,
            body_preview = truncate_chars(&parsed.body, LOG_PREVIEW_CHARS),
            "Reply received"
        );

        let metadata = extract_commands(&parsed.body);
        let body = clean_body(&parsed.body);

        if !metadata.is_empty() {
            let context = format!("Failed to update metadata for {conversation_id}");
            if steps
                .attempt(
                    METADATA_MERGE,
                    &context,
                    self.conversations.merge_metadata(conversation_id, &metadata),
                )
                .await
                .is_some()
            {
                info!(conversation_id, metadata = ?metadata, "Metadata updated");
            }
        }

        let reply = OutboundMessage {
            recipient: original_sender.clone(),
            subject: subject.to_string(),
            body,
            reply_to: None,
        };
        steps
            .require(
                REPLY_ENQUEUE,
                enqueue_json(self.queue.as_ref(), queues::REPLIES, &reply),
            )
            .await?;
        info!(conversation_id, recipient = %original_sender, "Reply enqueued");

        let archive_key = keys::conversation_message(conversation_id, message_id);
        steps.require(ARCHIVE, self.blobs.put(&archive_key, &raw)).await?;
        steps
            .require(DELETE_STAGED, self.blobs.delete(&staging_key))
            .await?;

        Ok(ReplyReport {
            message_id: message_id.to_string(),
            outcome: ReplyOutcome::Enqueued {
                conversation_id: conversation_id.to_string(),
                recipient: original_sender,
                metadata_keys: metadata.into_keys().collect(),
            },
            steps: steps.into_records(),
        })
    }

    async fn sender_not_found(
        &self,
        message_id: &str,
        conversation_id: &str,
        thread_address: &str,
        lookup_error: Option<&DatabaseError>,
    ) -> ReplyReport {
        match lookup_error {
            Some(e) => error!(
                conversation_id,
                thread_address,
                error = %e,
                "Sender lookup failed"
            ),
            None => error!(conversation_id, thread_address, "Sender not found"),
        }
        self.notifier
            .notify(Alert::new(
                SENDER_NOT_FOUND_SUBJECT,
                format!(
                    "No senderEmail found for conversationId '{conversation_id}'. Manual cleanup required."
                ),
            ))
            .await;

        ReplyReport {
            message_id: message_id.to_string(),
            outcome: ReplyOutcome::SenderNotFound {
                conversation_id: conversation_id.to_string(),
            },
            steps: Vec::new(),
        }
    }
}

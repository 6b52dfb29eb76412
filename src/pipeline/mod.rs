//! Mail processing pipeline.
//!
//! Every received message is handled by one of two orchestrators:
//! 1. `InboundProcessor` for mail to the public address: spam filtering,
//!    acknowledgement, forwarding to the private mailbox, archiving.
//! 2. `ReplyProcessor` for the operator's replies to a thread address:
//!    metadata commands, cleanup, delivery back to the original sender.
//!
//! Outbound mail is never sent inline. Orchestrators enqueue it and the
//! delivery workers send it with retries.

pub mod commands;
pub mod inbound;
pub mod message;
pub mod reply;
pub mod rules;
pub mod ruleset_cache;
pub mod steps;
pub mod types;

use serde::Serialize;

use crate::error::PipelineError;
use crate::store::WorkQueue;

pub use inbound::{InboundOutcome, InboundProcessor, InboundReport};
pub use reply::{ReplyOutcome, ReplyProcessor, ReplyReport};
pub use rules::SpamClassifier;
pub use ruleset_cache::RulesetCache;

/// Characters of a body included in log lines.
pub const LOG_PREVIEW_CHARS: usize = 500;

/// Addresses the relay routes between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAddresses {
    /// Published contact address; mail to anything else is spam.
    pub public_email: String,
    /// Operator mailbox that receives forwards.
    pub private_email: String,
    /// Domain for per-conversation thread addresses.
    pub domain_name: String,
}

impl RelayAddresses {
    /// `<conversation_id>@thread.<domain>`
    pub fn thread_address(&self, conversation_id: &str) -> String {
        format!("{conversation_id}@thread.{}", self.domain_name)
    }
}

/// Serialize `message` and append it to `queue`.
pub async fn enqueue_json<T: Serialize + ?Sized>(
    queue: &dyn WorkQueue,
    queue_name: &str,
    message: &T,
) -> Result<String, PipelineError> {
    let body = serde_json::to_string(message)?;
    Ok(queue.enqueue(queue_name, &body).await?)
}

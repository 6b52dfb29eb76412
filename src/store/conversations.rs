//! Conversation store adapter used by the orchestrators.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::error::DatabaseError;
use crate::identity;
use crate::pipeline::types::truncate_chars;
use crate::store::traits::{ConversationStore, ConversationUpdate};

/// Maximum characters of a message body kept on the conversation record.
pub const STORED_BODY_CHARS: usize = 1000;

/// Conversation operations over any `ConversationStore`.
#[derive(Clone)]
pub struct Conversations {
    store: Arc<dyn ConversationStore>,
}

impl Conversations {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// True if no record exists for `conversation_id`.
    ///
    /// Keyed by the resolved conversation id rather than the raw sender, so
    /// relay senders that share a display name share first contact.
    /// A failed lookup counts as "seen before" so transient store errors
    /// never trigger duplicate acknowledgements.
    pub async fn is_first_contact(&self, conversation_id: &str) -> bool {
        match self.store.get_conversation(conversation_id).await {
            Ok(existing) => existing.is_none(),
            Err(e) => {
                warn!(conversation_id, error = %e, "First-contact lookup failed; assuming known sender");
                false
            }
        }
    }

    /// Record an inbound message on its conversation.
    pub async fn upsert(
        &self,
        conversation_id: &str,
        sender_email: &str,
        subject: &str,
        body: &str,
        display_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let update = ConversationUpdate {
            conversation_id,
            sender_email,
            email_domain: identity::email_domain(sender_email),
            display_name: display_name.filter(|n| !n.is_empty()),
            subject,
            last_message_body: truncate_chars(body, STORED_BODY_CHARS),
            timestamp: Utc::now(),
        };
        self.store.upsert_conversation(&update).await
    }

    /// The original sender for a conversation, if it exists.
    pub async fn lookup_sender_email(
        &self,
        conversation_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .store
            .get_conversation(conversation_id)
            .await?
            .map(|c| c.sender_email))
    }

    /// Apply reply metadata. Empty metadata is a no-op; a missing
    /// conversation is `DatabaseError::NotFound`.
    pub async fn merge_metadata(
        &self,
        conversation_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), DatabaseError> {
        if metadata.is_empty() {
            return Ok(());
        }
        let updated = self
            .store
            .merge_conversation_metadata(conversation_id, metadata)
            .await?;
        if !updated {
            return Err(DatabaseError::NotFound {
                entity: "conversation".into(),
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }
}

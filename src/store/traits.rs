//! Persistence traits for conversations, the work queue, and parameters.
//!
//! `LibSqlBackend` implements all three; callers hold whichever trait object
//! they need.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// A conversation record.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub conversation_id: String,
    pub sender_email: String,
    pub email_domain: String,
    pub display_name: Option<String>,
    pub subject: String,
    pub last_message_body: String,
    /// Last update.
    pub timestamp: DateTime<Utc>,
    /// Set once, on the first write for this conversation.
    pub first_contact_date: DateTime<Utc>,
    /// Metadata gathered from reply commands.
    pub metadata: BTreeMap<String, String>,
}

/// Fields written on every inbound message.
#[derive(Debug, Clone)]
pub struct ConversationUpdate<'a> {
    pub conversation_id: &'a str,
    pub sender_email: &'a str,
    pub email_domain: &'a str,
    /// `None` keeps whatever display name is already stored.
    pub display_name: Option<&'a str>,
    pub subject: &'a str,
    pub last_message_body: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// A message claimed from a queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub queue: String,
    pub body: String,
    /// How many times this message has been handed out, this one included.
    pub receive_count: u32,
}

/// Key-value store of conversation records.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Insert or update in one statement. `first_contact_date` is only ever
    /// written on insert.
    async fn upsert_conversation(&self, update: &ConversationUpdate<'_>)
    -> Result<(), DatabaseError>;

    /// Set each metadata key in one statement. Returns false when the
    /// conversation does not exist.
    async fn merge_conversation_metadata(
        &self,
        conversation_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, DatabaseError>;
}

/// Durable FIFO queues with at-least-once delivery.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message; returns its id.
    async fn enqueue(&self, queue: &str, body: &str) -> Result<String, DatabaseError>;

    /// Claim the oldest visible message and hide it for `visibility`.
    async fn receive(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<QueuedMessage>, DatabaseError>;

    /// Remove a message after successful handling.
    async fn ack(&self, id: &str) -> Result<(), DatabaseError>;

    /// Park a message that will not be handed out again.
    async fn dead_letter(&self, id: &str, error: &str) -> Result<(), DatabaseError>;

    /// Number of messages not yet acked or dead-lettered.
    async fn pending_count(&self, queue: &str) -> Result<u64, DatabaseError>;
}

/// Named string parameters.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<Option<String>, DatabaseError>;

    async fn put_parameter(&self, name: &str, value: &str) -> Result<(), DatabaseError>;
}

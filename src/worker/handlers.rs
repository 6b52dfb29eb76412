//! Handlers for the relay's queues.

use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::{Deliverer, DeliveryKind};
use crate::error::PipelineError;
use crate::extract::AttachmentTextHandler;
use crate::pipeline::types::{AttachmentEvent, OutboundMessage};
use crate::worker::queue::QueueHandler;

/// Sends queued outbound mail through the retry state machine.
pub struct DeliveryHandler {
    deliverer: Deliverer,
    kind: DeliveryKind,
}

impl DeliveryHandler {
    pub fn new(deliverer: Deliverer, kind: DeliveryKind) -> Self {
        Self { deliverer, kind }
    }
}

#[async_trait]
impl QueueHandler for DeliveryHandler {
    async fn handle(&self, body: &str) -> Result<(), PipelineError> {
        let message: OutboundMessage = serde_json::from_str(body)?;
        self.deliverer
            .send_with_retry(self.kind, &message)
            .await?;
        Ok(())
    }
}

/// Runs text extraction for `attachments` queue events.
pub struct AttachmentQueueHandler {
    inner: Arc<AttachmentTextHandler>,
}

impl AttachmentQueueHandler {
    pub fn new(inner: Arc<AttachmentTextHandler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QueueHandler for AttachmentQueueHandler {
    async fn handle(&self, body: &str) -> Result<(), PipelineError> {
        let event: AttachmentEvent = serde_json::from_str(body)?;
        self.inner.handle_event(&event).await?;
        Ok(())
    }
}

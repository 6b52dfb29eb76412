//! Queue workers.
//!
//! - `queue`: generic polling consumer that acks or dead-letters
//! - `handlers`: handlers for the delivery and attachment queues

pub mod handlers;
pub mod queue;

pub use handlers::{AttachmentQueueHandler, DeliveryHandler};
pub use queue::{QueueHandler, WorkOutcome, WorkerSettings, process_next, spawn_queue_worker};

//! Error types for the contact relay.

use crate::delivery::SendError;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors (conversations, queue, parameters).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery to {recipient} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        recipient: String,
        attempts: usize,
        last_error: SendError,
    },
}

/// Document text extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unsupported attachment type: {0}")]
    Unsupported(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Errors raised while orchestrating an inbound message or reply.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Failed to parse message {message_id}")]
    Parse { message_id: String },

    #[error("Receipt event has no destination address")]
    MissingDestination,

    #[error("Extraction failed for {key}: {reason}")]
    Extraction { key: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

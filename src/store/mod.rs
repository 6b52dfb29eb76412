//! Persistence layer: libSQL-backed conversations, work queue, and parameters.

pub mod conversations;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use conversations::Conversations;
pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Conversation, ConversationStore, ConversationUpdate, ParameterStore, QueuedMessage, WorkQueue,
};

//! Object storage: raw mail, quarantined spam, attachments, extracted text.

pub mod fs;
pub mod keys;
pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Byte blobs addressed by `/`-separated keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object. Missing keys are `StorageError::NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite an object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

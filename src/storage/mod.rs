//! Checkpoint Storage
//!
//! The engine persists each instance's checkpoint through a
//! [`CheckpointStore`], keyed by instance id. Blobs are opaque to the store.
//!
//! - [`memory`]: process-local store
//! - [`file`]: one JSON file per instance under a state directory

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

/// Persistence backend for workflow checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stores `blob` for `instance_id`, replacing any previous one.
    /// Returns `Ok(false)` if the backend declined to store it.
    async fn save(&self, instance_id: &str, blob: &[u8]) -> Result<bool, StoreError>;

    /// Loads the last blob saved for `instance_id`.
    async fn load(&self, instance_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes the checkpoint for `instance_id`. Returns whether one existed.
    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError>;
}

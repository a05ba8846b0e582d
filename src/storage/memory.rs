use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CheckpointStore;
use crate::error::StoreError;

/// Keeps checkpoints in memory. Lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, instance_id: &str, blob: &[u8]) -> Result<bool, StoreError> {
        self.inner
            .write()
            .await
            .insert(instance_id.to_string(), blob.to_vec());
        Ok(true)
    }

    async fn load(&self, instance_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().await.get(instance_id).cloned())
    }

    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(instance_id).is_some())
    }
}

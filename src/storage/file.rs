//! File-backed checkpoint store.
//!
//! Checkpoints are saved to `{dir}/{instance_id}.checkpoint.json`. Writes go
//! to a temporary file first and are renamed into place, so a crash mid-write
//! leaves the previous checkpoint intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use tokio::fs;

use super::CheckpointStore;
use crate::error::StoreError;

/// Default state directory, relative to the working directory.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".sellerflow/checkpoints";

/// Stores one JSON file per workflow instance.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the checkpoint file path for an instance.
    ///
    /// Ids are used verbatim as file names, so only ASCII letters, digits,
    /// `-` and `_` are accepted.
    pub fn checkpoint_path(&self, instance_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !instance_id.is_empty()
            && instance_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(instance_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.checkpoint.json", instance_id)))
    }
}

impl Default for FileCheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_DIR)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, instance_id: &str, blob: &[u8]) -> Result<bool, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.checkpoint_path(instance_id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Saved checkpoint to {}", path.display());
        Ok(true)
    }

    async fn load(&self, instance_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.checkpoint_path(instance_id)?;
        match fs::read(&path).await {
            Ok(blob) => {
                info!("Loaded checkpoint from {}", path.display());
                Ok(Some(blob))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        let path = self.checkpoint_path(instance_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted checkpoint file: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_creates_dir_and_loads_back() {
        let temp_dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path().join("nested/state"));

        assert!(store.save("wf-1", b"{\"a\":1}").await.unwrap());
        assert!(store.checkpoint_path("wf-1").unwrap().exists());
        assert_eq!(store.load("wf-1").await.unwrap(), Some(b"{\"a\":1}".to_vec()));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let temp_dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_file() {
        let temp_dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        store.save("wf", b"one").await.unwrap();
        store.save("wf", b"two").await.unwrap();

        assert_eq!(store.load("wf").await.unwrap(), Some(b"two".to_vec()));
        assert!(!temp_dir.path().join("wf.checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_nonexistent() {
        let temp_dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());
        assert!(!store.delete("missing").await.unwrap());

        store.save("present", b"x").await.unwrap();
        assert!(store.delete("present").await.unwrap());
        assert!(!store.checkpoint_path("present").unwrap().exists());
    }

    #[tokio::test]
    async fn test_ids_that_are_not_file_safe_are_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());

        for id in ["../../etc/passwd", "a.b", "a b", ""] {
            assert!(matches!(store.save(id, b"x").await, Err(StoreError::InvalidKey(_))));
            assert!(matches!(store.load(id).await, Err(StoreError::InvalidKey(_))));
        }

        // Distinct ids never share a file.
        store.save("a_b", b"underscore").await.unwrap();
        assert!(store.save("a.b", b"dot").await.is_err());
        assert_eq!(store.load("a_b").await.unwrap(), Some(b"underscore".to_vec()));
        assert_eq!(
            store.checkpoint_path("3f2a-9c_x").unwrap(),
            temp_dir.path().join("3f2a-9c_x.checkpoint.json")
        );
    }
}

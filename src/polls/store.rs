//! Poll Store
//!
//! Key-value backends for persisted poll records. The engine never talks to
//! a store directly; requests go through the persistence worker.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::StoreConfig;

/// Errors raised by store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store holding encoded poll records
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// In-process store, used for tests and sessions without a disk cache
#[derive(Debug, Default)]
pub struct MemoryPollStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Directory-backed store with one file per key.
///
/// File names are the hex-encoded key. Writes go to a temporary file that is
/// renamed over the target, so a reader never sees a partial record.
#[derive(Debug, Clone)]
pub struct FilePollStore {
    dir: PathBuf,
}

impl FilePollStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.rec", hex::encode(key)))
    }
}

#[async_trait]
impl PollStore for FilePollStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("rec.tmp");
        tokio::fs::write(&tmp_path, &value).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

/// Open the store described by `config`
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn PollStore>, StoreError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryPollStore::new())),
        StoreConfig::File { dir } => {
            let store = FilePollStore::open(dir).await?;
            info!(dir = %store.dir().display(), "opened poll file store");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPollStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("poll1").await.unwrap(), None);

        store.set("poll1", vec![1, 2, 3]).await.unwrap();
        store.set("poll1", vec![4]).await.unwrap();

        assert_eq!(store.get("poll1").await.unwrap(), Some(vec![4]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePollStore::open(dir.path().join("polls")).await.unwrap();

        assert_eq!(store.get("poll42").await.unwrap(), None);
        store.set("poll42", b"record".to_vec()).await.unwrap();
        assert_eq!(store.get("poll42").await.unwrap(), Some(b"record".to_vec()));

        let reopened = FilePollStore::open(store.dir()).await.unwrap();
        assert_eq!(
            reopened.get("poll42").await.unwrap(),
            Some(b"record".to_vec())
        );
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePollStore::open(dir.path()).await.unwrap();
        store.set("poll7", vec![7]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.rec", hex::encode("poll7"))]);
    }

    #[tokio::test]
    async fn test_open_store_from_config() {
        let store = open_store(&StoreConfig::Memory).await.unwrap();
        assert_eq!(store.get("poll1").await.unwrap(), None);

        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::File {
            dir: dir.path().join("nested").join("polls"),
        };
        let store = open_store(&config).await.unwrap();
        store.set("poll1", vec![1]).await.unwrap();
        assert!(dir.path().join("nested").join("polls").is_dir());
    }
}

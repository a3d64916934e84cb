//! File-backed [`BlobStore`].
//!
//! Keeps every key in one JSON object on disk, loaded lazily on first use
//! and rewritten whole on each change (temp file + rename). An optional
//! byte quota reproduces the "store full" failure of browser storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use doc_harness_core::store::{footprint, BlobStore, StoreError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::StoreConfig;

pub struct FileBlobStore {
    path: PathBuf,
    quota: Option<usize>,
    items: Mutex<Option<HashMap<String, String>>>,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>, quota: Option<usize>) -> Self {
        Self {
            path: path.into(),
            quota,
            items: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.path.clone(), config.max_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StoreError::Backend(format!("corrupt store file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn write_file(&self, items: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
        }
        let json = serde_json::to_string(items).map_err(|e| StoreError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        debug!(path = %self.path.display(), keys = items.len(), "store file written");
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut guard = self.items.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard.as_ref().and_then(|items| items.get(key).cloned()))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.items.lock().await;
        let mut items = match guard.take() {
            Some(items) => items,
            None => self.read_file().await?,
        };

        if let Some(limit) = self.quota {
            let needed =
                footprint(items.iter().filter(|(k, _)| k.as_str() != key)) + key.len() + value.len();
            if needed > limit {
                *guard = Some(items);
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        let previous = items.insert(key.to_string(), value.to_string());
        let result = self.write_file(&items).await;
        if result.is_err() {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(old) => items.insert(key.to_string(), old),
                None => items.remove(key),
            };
        }
        *guard = Some(items);
        result
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.items.lock().await;
        let empty = HashMap::new();
        self.write_file(&empty).await?;
        *guard = Some(empty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn values_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/store.json");
        let store = FileBlobStore::new(&path, None);
        store.set_item("a", "1").await.unwrap();

        let reopened = FileBlobStore::new(&path, None);
        assert_eq!(reopened.get_item("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get_item("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_failure_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        let store = FileBlobStore::new(&path, Some(8));
        store.set_item("a", "1").await.unwrap();
        let err = store.set_item("b", "too long value").await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        let reopened = FileBlobStore::new(&path, None);
        assert_eq!(reopened.get_item("b").await.unwrap(), None);
        assert_eq!(reopened.get_item("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn clear_empties_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.json");
        let store = FileBlobStore::new(&path, None);
        store.set_item("a", "1").await.unwrap();
        store.clear().await.unwrap();
        let reopened = FileBlobStore::new(&path, None);
        assert_eq!(reopened.get_item("a").await.unwrap(), None);
    }
}

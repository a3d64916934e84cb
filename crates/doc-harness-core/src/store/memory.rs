//! In-memory [`BlobStore`] implementation for testing and embedded use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. An optional byte quota
//! reproduces the "store full" behavior of browser storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{footprint, BlobStore, StoreError};

/// In-memory blob store.
pub struct InMemoryBlobStore {
    items: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota: None,
        }
    }

    /// Store that rejects writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    /// Raw stored value, bypassing the async interface.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.read().unwrap().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.read().unwrap().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().unwrap();
        if let Some(limit) = self.quota {
            let others = footprint(items.iter().filter(|(k, _)| k.as_str() != key));
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.items.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryBlobStore::new();
        store.set_item("k", "v").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get_item("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write() {
        let store = InMemoryBlobStore::with_quota(10);
        store.set_item("a", "1234").await.unwrap();
        let err = store.set_item("b", "123456789").await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        // Replacing an existing key only counts the new value.
        store.set_item("a", "12345678").await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = InMemoryBlobStore::new();
        store.set_item("a", "1").await.unwrap();
        store.set_item("b", "2").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}

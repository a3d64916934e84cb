//! Key-value blob store abstraction.
//!
//! The [`BlobStore`] trait models a durable, size-limited string-to-string
//! mapping (the browser's local storage in the original deployment). The
//! document cache keeps its whole serialized map under one reserved key and
//! the confidentiality codec keeps its key under another.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a [`BlobStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would push the store past its byte limit.
    #[error("quota exceeded writing '{key}': {needed} bytes needed, limit is {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// Any other backend failure (I/O, serialization).
    #[error("blob store error: {0}")]
    Backend(String),
}

/// Durable, opaque string-to-string store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_item`](BlobStore::get_item) | Read a value, `None` when absent |
/// | [`set_item`](BlobStore::set_item) | Replace a value; may fail with [`StoreError::QuotaExceeded`] |
/// | [`clear`](BlobStore::clear) | Remove every key |
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// Total bytes a map of entries occupies, counting keys and values.
pub fn footprint<'a>(entries: impl IntoIterator<Item = (&'a String, &'a String)>) -> usize {
    entries.into_iter().map(|(k, v)| k.len() + v.len()).sum()
}

//! Document cache: memoized extraction results, persisted encrypted.
//!
//! The cache maps names to extracted text. One extraction is written under
//! its composite key (`"<name>_<size>"`) and every alias (bare name,
//! folder-qualified name) as whole values. The in-memory map is always
//! plaintext; the blob store only ever receives the tagged, encrypted form
//! under [`CACHE_STORE_KEY`].
//!
//! # Lookup authority
//!
//! [`get`](DocumentCache::get) is an exact-key lookup. The composite key
//! identifies one specific file. A bare-name alias holds whatever was
//! written last under that name, so callers that know the size should look
//! up the composite key first.
//!
//! # Persistence
//!
//! Persists are serialized by an async mutex held across the store write;
//! the map lock itself is only held while taking the snapshot. A failed
//! write wipes the store, restores the codec key, and retries once. A second
//! failure is logged and the in-memory cache stays authoritative.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use doc_harness_core::context::CacheLookup;
use doc_harness_core::keys::{split_composite, FOLDER_SEPARATOR};
use doc_harness_core::store::BlobStore;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;

/// Blob-store key holding the serialized cache map.
pub const CACHE_STORE_KEY: &str = "processedDocuments";

/// How a [`DocumentCache::persist`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// The first write failed; the store was wiped and the retry succeeded.
    WrittenAfterWipe,
    /// Nothing reached the store; in-memory state is unaffected.
    Failed,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, String>,
    /// Primary key -> aliases written with it.
    groups: HashMap<String, BTreeSet<String>>,
}

pub struct DocumentCache {
    state: RwLock<CacheState>,
    store: Arc<dyn BlobStore>,
    codec: Codec,
    persist_lock: Mutex<()>,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn BlobStore>, codec: Codec) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            store,
            codec,
            persist_lock: Mutex::new(()),
        }
    }

    /// Builds a cache over `store`, loading its codec key and entries.
    pub async fn open(store: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        let codec = Codec::load_or_create(store.as_ref()).await?;
        let cache = Self::new(store, codec);
        cache.load().await;
        Ok(cache)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.state.read().unwrap().entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().unwrap().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.read().unwrap().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Plaintext copy of every entry.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.state.read().unwrap().entries.clone()
    }

    /// Writes `text` under `primary` and each alias, then persists.
    pub async fn put(&self, primary: &str, aliases: &[String], text: &str) {
        {
            let mut state = self.state.write().unwrap();
            state.entries.insert(primary.to_string(), text.to_string());
            for alias in aliases {
                state.entries.insert(alias.clone(), text.to_string());
            }
            state
                .groups
                .entry(primary.to_string())
                .or_default()
                .extend(aliases.iter().filter(|a| a.as_str() != primary).cloned());
        }
        debug!(key = primary, aliases = aliases.len(), chars = text.len(), "cache put");
        self.persist().await;
    }

    /// Removes one entry group, or everything when `name` is `None`.
    ///
    /// A primary key takes its aliases with it; an alias takes every primary
    /// that lists it (and their aliases). Returns the number of keys removed.
    pub async fn clear(&self, name: Option<&str>) -> usize {
        let removed = {
            let mut state = self.state.write().unwrap();
            match name {
                None => {
                    let n = state.entries.len();
                    state.entries.clear();
                    state.groups.clear();
                    n
                }
                Some(name) => {
                    let mut doomed = BTreeSet::from([name.to_string()]);
                    if let Some(aliases) = state.groups.remove(name) {
                        doomed.extend(aliases);
                    }
                    let owners: Vec<String> = state
                        .groups
                        .iter()
                        .filter(|(_, aliases)| aliases.contains(name))
                        .map(|(primary, _)| primary.clone())
                        .collect();
                    for owner in owners {
                        if let Some(aliases) = state.groups.remove(&owner) {
                            doomed.extend(aliases);
                        }
                        doomed.insert(owner);
                    }
                    doomed
                        .iter()
                        .filter(|key| state.entries.remove(key.as_str()).is_some())
                        .count()
                }
            }
        };
        match name {
            Some(name) => info!("cleared cache for {} ({} keys)", name, removed),
            None => info!("cleared all document caches ({} keys)", removed),
        }
        self.persist().await;
        removed
    }

    /// Replaces the in-memory map with the persisted one. Returns the entry count.
    pub async fn load(&self) -> usize {
        let raw = match self.store.get_item(CACHE_STORE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!("could not read document cache: {}", e);
                return 0;
            }
        };
        let stored: HashMap<String, String> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!("ignoring malformed document cache: {}", e);
                return 0;
            }
        };

        let entries: HashMap<String, String> = stored
            .into_iter()
            .map(|(key, value)| {
                let text = self.codec.open(&value);
                (key, text)
            })
            .collect();
        let groups = rebuild_groups(&entries);
        let count = entries.len();

        *self.state.write().unwrap() = CacheState { entries, groups };
        info!("loaded {} cached document entries", count);
        count
    }

    /// Encrypts and writes the whole map as one blob-store entry.
    pub async fn persist(&self) -> PersistOutcome {
        let _guard = self.persist_lock.lock().await;

        let snapshot = self.snapshot();
        let mut sealed = BTreeMap::new();
        for (key, text) in snapshot {
            match self.codec.seal(&text) {
                Ok(value) => {
                    sealed.insert(key, value.to_stored());
                }
                Err(e) => warn!("not persisting '{}': {}", key, e),
            }
        }
        let json = match serde_json::to_string(&sealed) {
            Ok(json) => json,
            Err(e) => {
                error!("could not serialize document cache: {}", e);
                return PersistOutcome::Failed;
            }
        };

        let first = match self.store.set_item(CACHE_STORE_KEY, &json).await {
            Ok(()) => {
                debug!(entries = sealed.len(), bytes = json.len(), "document cache persisted");
                return PersistOutcome::Written;
            }
            Err(e) => e,
        };

        warn!("document cache write failed ({}); wiping store and retrying", first);
        if let Err(e) = self.store.clear().await {
            error!("could not wipe store: {}", e);
            return PersistOutcome::Failed;
        }
        if let Err(e) = self.codec.save_key(self.store.as_ref()).await {
            warn!("could not restore encryption key after wipe: {}", e);
        }
        match self.store.set_item(CACHE_STORE_KEY, &json).await {
            Ok(()) => PersistOutcome::WrittenAfterWipe,
            Err(e) => {
                error!("document cache not persisted: {}", e);
                PersistOutcome::Failed
            }
        }
    }
}

impl CacheLookup for DocumentCache {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key)
    }
}

/// Recovers alias groups from key shape after a load.
///
/// A composite key `"<name>_<size>"` owns `"<name>"` and any
/// `"<folder>/<name>"` that hold identical text.
fn rebuild_groups(entries: &HashMap<String, String>) -> HashMap<String, BTreeSet<String>> {
    let mut groups: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (key, text) in entries {
        let Some((name, _)) = split_composite(key) else {
            continue;
        };
        let suffix = format!("{}{}", FOLDER_SEPARATOR, name);
        let aliases: BTreeSet<String> = entries
            .iter()
            .filter(|(other, other_text)| {
                other.as_str() != key
                    && *other_text == text
                    && ((other.as_str() == name && !name.contains(FOLDER_SEPARATOR))
                        || other.ends_with(&suffix))
            })
            .map(|(other, _)| other.clone())
            .collect();
        groups.insert(key.clone(), aliases);
    }
    groups
}

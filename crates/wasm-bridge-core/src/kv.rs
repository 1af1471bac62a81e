//! Host-side key/value exchange store.
//!
//! Guests move bulk data in and out of the host through `set_data` /
//! `get_data`. Values are owned copies, never views into linear memory, so a
//! stored value survives the guest overwriting or growing its memory.
//!
//! One store is shared by every context of a pool. Concurrent writes to the
//! same key are last-writer-wins; there is no per-key locking.

use std::sync::Arc;

use dashmap::DashMap;

/// Shared, string-keyed blob store.
#[derive(Clone, Default)]
pub struct KvStore {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl KvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(key.into(), value)
    }

    /// A copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Whether `key` has a value.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove and return the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("entries", &self.len()).finish()
    }
}

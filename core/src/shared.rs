//! Cloneable handle serializing all table access through one lock.
//!
//! Mutations take the write lock; lookups take the read lock, so reads may
//! run concurrently with each other but never overlap a mutation or observe a
//! half-completed split.

use std::hash::{BuildHasher, Hash};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::table::{DeterministicState, ExtendibleHashTable, TableError, TableStatus};

pub struct SharedTable<K, V, S = DeterministicState> {
    inner: Arc<RwLock<ExtendibleHashTable<K, V, S>>>,
}

impl<K, V, S> Clone for SharedTable<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> SharedTable<K, V, S>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
    S: BuildHasher + Default,
{
    pub fn new(table: ExtendibleHashTable<K, V, S>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    pub fn put(&self, key: K, value: V) -> Result<Option<V>, TableError> {
        self.inner.write().put(key, value)
    }

    /// Returns a clone of the stored value; the lock is released before the
    /// call returns.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>, TableError> {
        self.inner.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.read().global_depth()
    }

    pub fn status(&self) -> TableStatus {
        self.inner.read().status()
    }

    pub fn save(&self, meta_path: &Path) -> Result<(), TableError> {
        self.inner.write().save(meta_path)
    }
}

//! Opt-in persistence through an external key-value interface.
//!
//! The store never persists on its own. Callers that want a store list to
//! survive a restart hand a [`KeyValueStore`] to [`LocalStore::save_store`]
//! and [`LocalStore::load_store`]; each list is written as one JSON array
//! under [`store_key`].

use crate::error::{StoreError, StoreResult};
use crate::local_store::LocalStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tempus_model::Document;
use tempus_types::StoreName;
use tracing::info;

/// Minimal get/set/delete-by-key backend.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: String) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Key under which a store's list is persisted.
pub fn store_key(store: &StoreName) -> String {
    format!("store/{store}")
}

/// Process-local [`KeyValueStore`], mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

impl LocalStore {
    /// Writes a store's list to `kv`. Returns the number of documents saved.
    pub fn save_store(&self, store: &StoreName, kv: &dyn KeyValueStore) -> StoreResult<usize> {
        let (json, count) = self.read(store, |docs| {
            serde_json::to_string(docs).map(|json| (json, docs.len()))
        })?;
        kv.set(&store_key(store), json)?;
        info!("Saved {} documents from store {}", count, store);
        Ok(count)
    }

    /// Replaces a store's contents with what `kv` holds for it. A missing
    /// entry leaves the store untouched and returns 0.
    pub fn load_store(&self, store: &StoreName, kv: &dyn KeyValueStore) -> StoreResult<usize> {
        let Some(json) = kv.get(&store_key(store))? else {
            return Ok(0);
        };
        let docs: Vec<Document> = serde_json::from_str(&json)?;
        let count = docs.len();
        // Check the whole list first so a bad entry leaves the store as it was.
        validate_list(store, &docs)?;
        self.transact(store, |txn| {
            txn.truncate();
            docs.into_iter().try_for_each(|doc| txn.insert(doc))
        })?;
        info!("Loaded {} documents into store {}", count, store);
        Ok(count)
    }

    /// Deletes a store's persisted list.
    pub fn forget_store(&self, store: &StoreName, kv: &dyn KeyValueStore) -> StoreResult<()> {
        kv.delete(&store_key(store))
    }
}

fn validate_list(store: &StoreName, docs: &[Document]) -> StoreResult<()> {
    let mut seen = HashSet::with_capacity(docs.len());
    for doc in docs {
        if doc.store_name != *store {
            return Err(StoreError::StoreMismatch {
                id: doc.id.clone(),
                expected: store.clone(),
                found: doc.store_name.clone(),
            });
        }
        if !seen.insert(&doc.id) {
            return Err(StoreError::DuplicateIdentity {
                store: store.clone(),
                id: doc.id.clone(),
            });
        }
    }
    Ok(())
}

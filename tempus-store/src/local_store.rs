//! Per-store ordered document lists.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tempus_model::Document;
use tempus_types::{DocumentId, StoreName, Timestamp};
use tokio::sync::broadcast;
use tracing::debug;

/// Default buffer size for per-store change notifications.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// A mutation that was applied to one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub store_name: StoreName,
    /// Monotonic per-store counter, incremented on every mutation.
    pub revision: u64,
    pub kind: ChangeKind,
}

/// What happened to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeKind {
    Inserted(DocumentId),
    Removed(DocumentId),
    Closed {
        id: DocumentId,
        effective_to: Timestamp,
    },
    Truncated,
}

struct Slot {
    docs: Vec<Document>,
    revision: u64,
    notifier: broadcast::Sender<StoreChange>,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(capacity.max(1));
        Self {
            docs: Vec::new(),
            revision: 0,
            notifier,
        }
    }
}

/// Exclusive access to one store's list, used to run several mutations
/// under a single lock acquisition.
pub struct StoreTxn<'a> {
    store_name: &'a StoreName,
    slot: &'a mut Slot,
}

impl StoreTxn<'_> {
    /// The store this transaction operates on.
    pub fn store_name(&self) -> &StoreName {
        self.store_name
    }

    /// Current documents, in arrival order.
    pub fn documents(&self) -> &[Document] {
        &self.slot.docs
    }

    /// Looks up a document by id.
    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.slot.docs.iter().find(|d| &d.id == id)
    }

    /// Appends a document. Fails if one with the same id already exists.
    pub fn insert(&mut self, doc: Document) -> StoreResult<()> {
        if &doc.store_name != self.store_name {
            return Err(StoreError::StoreMismatch {
                id: doc.id,
                expected: self.store_name.clone(),
                found: doc.store_name,
            });
        }
        if self.get(&doc.id).is_some() {
            return Err(StoreError::DuplicateIdentity {
                store: self.store_name.clone(),
                id: doc.id,
            });
        }
        let id = doc.id.clone();
        self.slot.docs.push(doc);
        self.emit(ChangeKind::Inserted(id));
        Ok(())
    }

    /// Removes a document by id. Absent ids are ignored.
    pub fn remove_by_id(&mut self, id: &DocumentId) -> Option<Document> {
        let pos = self.slot.docs.iter().position(|d| &d.id == id)?;
        let removed = self.slot.docs.remove(pos);
        self.emit(ChangeKind::Removed(id.clone()));
        Some(removed)
    }

    /// Sets `effective_to` on a document in place, keeping its position.
    /// Returns false if the id is absent.
    pub fn close_version(&mut self, id: &DocumentId, effective_to: Timestamp) -> bool {
        let Some(doc) = self.slot.docs.iter_mut().find(|d| &d.id == id) else {
            return false;
        };
        doc.effective_to = Some(effective_to);
        self.emit(ChangeKind::Closed {
            id: id.clone(),
            effective_to,
        });
        true
    }

    /// Removes every document.
    pub fn truncate(&mut self) {
        self.slot.docs.clear();
        self.emit(ChangeKind::Truncated);
    }

    fn emit(&mut self, kind: ChangeKind) {
        self.slot.revision += 1;
        // No receivers is fine.
        let _ = self.slot.notifier.send(StoreChange {
            store_name: self.store_name.clone(),
            revision: self.slot.revision,
            kind,
        });
    }
}

/// In-memory mapping from store name to an ordered list of documents.
pub struct LocalStore {
    stores: RwLock<HashMap<StoreName, Arc<Mutex<Slot>>>>,
    notify_capacity: usize,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_notify_capacity(DEFAULT_NOTIFY_CAPACITY)
    }

    /// Creates an empty store with a custom change-notification buffer.
    pub fn with_notify_capacity(notify_capacity: usize) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            notify_capacity,
        }
    }

    fn existing_slot(&self, store: &StoreName) -> Option<Arc<Mutex<Slot>>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store)
            .cloned()
    }

    fn slot(&self, store: &StoreName) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.existing_slot(store) {
            return slot;
        }
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(store.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::new(self.notify_capacity))))
            .clone()
    }

    /// Runs `f` with exclusive access to one store.
    pub fn transact<R>(&self, store: &StoreName, f: impl FnOnce(&mut StoreTxn<'_>) -> R) -> R {
        let slot = self.slot(store);
        let mut guard = lock(&slot);
        let mut txn = StoreTxn {
            store_name: store,
            slot: &mut *guard,
        };
        f(&mut txn)
    }

    /// Runs `f` over a store's current documents without creating the store.
    pub fn read<R>(&self, store: &StoreName, f: impl FnOnce(&[Document]) -> R) -> R {
        match self.existing_slot(store) {
            Some(slot) => f(&lock(&slot).docs),
            None => f(&[]),
        }
    }

    /// Appends a document to a store.
    pub fn insert(&self, store: &StoreName, doc: Document) -> StoreResult<()> {
        debug!("Inserting document {} into store {}", doc.id, store);
        self.transact(store, |txn| txn.insert(doc))
    }

    /// Removes a document by id; returns it if it was present.
    pub fn remove_by_id(&self, store: &StoreName, id: &DocumentId) -> Option<Document> {
        let slot = self.existing_slot(store)?;
        let mut guard = lock(&slot);
        StoreTxn {
            store_name: store,
            slot: &mut *guard,
        }
        .remove_by_id(id)
    }

    /// Closes a document's effective interval in place.
    pub fn close_version(
        &self,
        store: &StoreName,
        id: &DocumentId,
        effective_to: Timestamp,
    ) -> bool {
        self.transact(store, |txn| txn.close_version(id, effective_to))
    }

    /// Clears one store.
    pub fn truncate(&self, store: &StoreName) {
        debug!("Truncating store {}", store);
        self.transact(store, |txn| txn.truncate());
    }

    /// Clears every store. Watchers stay subscribed.
    pub fn truncate_all(&self) {
        for store in self.store_names() {
            self.truncate(&store);
        }
    }

    /// Returns a copy of a store's documents in arrival order.
    pub fn list(&self, store: &StoreName) -> Vec<Document> {
        self.read(store, <[Document]>::to_vec)
    }

    /// Looks up a single document.
    pub fn get(&self, store: &StoreName, id: &DocumentId) -> Option<Document> {
        self.read(store, |docs| docs.iter().find(|d| &d.id == id).cloned())
    }

    /// Number of documents in a store.
    pub fn len(&self, store: &StoreName) -> usize {
        self.read(store, <[Document]>::len)
    }

    /// Returns true if the store has no documents.
    pub fn is_empty(&self, store: &StoreName) -> bool {
        self.len(store) == 0
    }

    /// Names of every store that has been written to or watched.
    pub fn store_names(&self) -> Vec<StoreName> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Current revision of a store (0 if never mutated).
    pub fn revision(&self, store: &StoreName) -> u64 {
        self.existing_slot(store)
            .map(|slot| lock(&slot).revision)
            .unwrap_or(0)
    }

    /// Subscribes to a store's mutations.
    pub fn watch(&self, store: &StoreName) -> broadcast::Receiver<StoreChange> {
        lock(&self.slot(store)).notifier.subscribe()
    }
}

//! Listener state tracking.
//!
//! Tracks, per collection, where its listener is in the lifecycle
//! `Unsubscribed → Subscribing → Syncing(not ready) → Syncing(ready)` and
//! holds the readiness signal that `ready()` callers wait on. Updates carry
//! the subscription id that produced them so a torn-down listener can never
//! overwrite the state of its replacement.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tempus_types::{CollectionId, StoreName, SubscriptionId, Timestamp};
use tokio::sync::watch;

/// Lifecycle state of one collection's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Unsubscribed,
    Subscribing,
    Syncing { ready: bool },
}

/// Snapshot of a listener's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerStatus {
    pub collection: CollectionId,
    pub state: ListenerState,
    pub subscription_id: Option<SubscriptionId>,
    pub store_names: Vec<StoreName>,
    pub batches_applied: u64,
    pub documents_applied: u64,
    pub documents_rejected: u64,
    pub last_batch_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl ListenerStatus {
    /// Creates the status of a collection that was never subscribed.
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            state: ListenerState::Unsubscribed,
            subscription_id: None,
            store_names: Vec::new(),
            batches_applied: 0,
            documents_applied: 0,
            documents_rejected: 0,
            last_batch_at: None,
            last_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ListenerState::Syncing { ready: true }
    }
}

struct Entry {
    status: ListenerStatus,
    ready: watch::Sender<bool>,
}

impl Entry {
    fn new(collection: CollectionId) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            status: ListenerStatus::new(collection),
            ready,
        }
    }

    fn owned_by(&self, subscription_id: SubscriptionId) -> bool {
        self.status.subscription_id == Some(subscription_id)
    }
}

/// What a batch did to a listener's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// This batch completed the initial snapshot.
    pub became_ready: bool,
}

/// Tracks listener state for all collections.
#[derive(Default)]
pub struct SyncState {
    listeners: HashMap<CollectionId, Entry>,
}

impl SyncState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, collection: &CollectionId) -> &mut Entry {
        self.listeners
            .entry(collection.clone())
            .or_insert_with(|| Entry::new(collection.clone()))
    }

    /// Records the start of a new registration. Readiness is reset until the
    /// new feed delivers its initial snapshot.
    pub fn begin_subscribe(
        &mut self,
        collection: &CollectionId,
        subscription_id: SubscriptionId,
        store_names: Vec<StoreName>,
    ) {
        let entry = self.entry(collection);
        entry.status = ListenerStatus {
            state: ListenerState::Subscribing,
            subscription_id: Some(subscription_id),
            store_names,
            ..ListenerStatus::new(collection.clone())
        };
        entry.ready.send_replace(false);
    }

    /// Records an applied batch.
    pub fn record_batch(
        &mut self,
        collection: &CollectionId,
        subscription_id: SubscriptionId,
        applied: usize,
        rejected: usize,
        initial_snapshot: bool,
    ) -> BatchOutcome {
        let entry = self.entry(collection);
        if !entry.owned_by(subscription_id) {
            return BatchOutcome { became_ready: false };
        }

        let status = &mut entry.status;
        status.batches_applied += 1;
        status.documents_applied += applied as u64;
        status.documents_rejected += rejected as u64;
        status.last_batch_at = Some(Timestamp::now());

        let was_ready = status.is_ready();
        let ready = was_ready || initial_snapshot;
        status.state = ListenerState::Syncing { ready };

        let became_ready = ready && !was_ready;
        if became_ready {
            entry.ready.send_replace(true);
        }
        BatchOutcome { became_ready }
    }

    /// Marks a registration as gone. `error` is kept as `last_error`.
    /// Returns false if `subscription_id` no longer owns the collection.
    pub fn end_subscription(
        &mut self,
        collection: &CollectionId,
        subscription_id: SubscriptionId,
        error: Option<String>,
    ) -> bool {
        let entry = self.entry(collection);
        if !entry.owned_by(subscription_id) {
            return false;
        }
        entry.status.state = ListenerState::Unsubscribed;
        entry.status.subscription_id = None;
        if error.is_some() {
            entry.status.last_error = error;
        }
        true
    }

    /// Clears readiness, used when the listener's data has been discarded.
    pub fn reset_ready(&mut self, collection: &CollectionId) {
        self.entry(collection).ready.send_replace(false);
    }

    /// Returns a receiver for the collection's readiness flag.
    pub fn ready_receiver(&mut self, collection: &CollectionId) -> watch::Receiver<bool> {
        self.entry(collection).ready.subscribe()
    }

    /// Whether the initial snapshot has been applied since the last subscribe.
    pub fn is_ready(&self, collection: &CollectionId) -> bool {
        self.listeners
            .get(collection)
            .is_some_and(|e| *e.ready.borrow())
    }

    /// Returns the collection's status.
    pub fn status(&self, collection: &CollectionId) -> ListenerStatus {
        self.listeners
            .get(collection)
            .map(|e| e.status.clone())
            .unwrap_or_else(|| ListenerStatus::new(collection.clone()))
    }

    /// Returns every tracked collection.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionId> {
        self.listeners.keys()
    }
}

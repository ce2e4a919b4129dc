//! Sync engine - owns one listener per subscribed collection.
//!
//! Each listener is a spawned worker draining a bounded queue that the
//! change feed fills. A batch is applied to completion before the next one
//! for the same collection is taken off the queue; different collections
//! run concurrently and only meet at the per-store locks of the
//! [`LocalStore`].

use crate::classifier::{ClassifyError, ClassifyResult, DeltaClassifier};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::feed::{Change, ChangeBatch, ChangeFeed, ChangeType, FeedHandle, FeedMessage};
use crate::state::{ListenerState, ListenerStatus, SyncState};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempus_model::{BusinessKey, Catalog, Document};
use tempus_store::{LocalStore, Predicate, Resolver, DEFAULT_NOTIFY_CAPACITY};
use tempus_types::{CollectionId, DocumentId, StoreName, SubscriptionId, Timestamp};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum batches queued per collection before the feed has to wait.
    pub queue_capacity: usize,
    /// Buffer of the engine event broadcast.
    pub event_capacity: usize,
    /// Buffer of each store's change broadcast.
    pub notify_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            event_capacity: 256,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

struct Registration {
    subscription_id: SubscriptionId,
    store_names: Vec<StoreName>,
    fed_stores: Arc<Mutex<HashSet<StoreName>>>,
    cancel: watch::Sender<bool>,
    feed_handle: FeedHandle,
    worker: JoinHandle<()>,
}

impl Registration {
    /// Stops delivery and waits for an in-flight batch to finish.
    async fn teardown(self, collection: &CollectionId) {
        self.cancel.send_replace(true);
        self.feed_handle.cancel();
        if let Err(e) = self.worker.await {
            warn!("Listener worker for {} ended abnormally: {}", collection, e);
        }
    }
}

type Registrations = Arc<Mutex<HashMap<CollectionId, Registration>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The sync engine: lifecycle API plus the consumer read API.
pub struct SyncEngine {
    config: SyncConfig,
    catalog: Arc<Catalog>,
    store: Arc<LocalStore>,
    classifier: DeltaClassifier,
    resolver: Resolver,
    feed: Arc<dyn ChangeFeed>,
    registrations: Registrations,
    state: Arc<RwLock<SyncState>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Creates an engine with an empty local store.
    pub fn new(catalog: Arc<Catalog>, feed: Arc<dyn ChangeFeed>, config: SyncConfig) -> Self {
        let store = Arc::new(LocalStore::with_notify_capacity(config.notify_capacity));
        Self::with_store(catalog, feed, store, config)
    }

    /// Creates an engine over an existing store, e.g. one preloaded from a
    /// [`tempus_store::KeyValueStore`].
    pub fn with_store(
        catalog: Arc<Catalog>,
        feed: Arc<dyn ChangeFeed>,
        store: Arc<LocalStore>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            classifier: DeltaClassifier::new(catalog.clone()),
            resolver: Resolver::new(store.clone(), catalog.clone()),
            config,
            catalog,
            store,
            feed,
            registrations: Arc::new(Mutex::new(HashMap::new())),
            state: Arc::new(RwLock::new(SyncState::new())),
            events,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn classifier(&self) -> &DeltaClassifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Subscribes to engine events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Starts mirroring `collection` into `store_names`. An empty store set
    /// accepts whatever stores the collection's documents name. Any live
    /// registration for the collection is torn down first.
    pub async fn subscribe(
        &self,
        collection: &CollectionId,
        store_names: &[StoreName],
    ) -> SyncResult<SubscriptionId> {
        if self.catalog.collection(collection).is_none() {
            return Err(SyncError::UnknownCollection(collection.clone()));
        }

        let existing = lock(&self.registrations).remove(collection);
        if let Some(old) = existing {
            info!("Replacing listener for collection {}", collection);
            old.teardown(collection).await;
        }

        let subscription_id = SubscriptionId::new();
        write(&self.state).begin_subscribe(collection, subscription_id, store_names.to_vec());

        let (sink, queue) = mpsc::channel(self.config.queue_capacity.max(1));
        let feed_handle = match self.feed.subscribe(collection, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                let cause = match e {
                    SyncError::Transport { cause, .. } => cause,
                    other => other.to_string(),
                };
                warn!("Subscribe failed for collection {}: {}", collection, cause);
                write(&self.state).end_subscription(
                    collection,
                    subscription_id,
                    Some(cause.clone()),
                );
                let _ = self.events.send(SyncEvent::TransportError {
                    collection: collection.clone(),
                    cause: cause.clone(),
                });
                return Err(SyncError::Transport {
                    collection: collection.clone(),
                    cause,
                });
            }
        };

        let (cancel, cancelled) = watch::channel(false);
        let fed_stores = Arc::new(Mutex::new(store_names.iter().cloned().collect::<HashSet<_>>()));
        let listener = Listener {
            collection: collection.clone(),
            subscription_id,
            declared: store_names.iter().cloned().collect(),
            fed_stores: fed_stores.clone(),
            classifier: self.classifier.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            registrations: self.registrations.clone(),
        };
        // The worker may fail straight away; it must find its registration.
        let raced = {
            let mut registrations = lock(&self.registrations);
            let worker = tokio::spawn(listener.run(queue, cancelled));
            registrations.insert(
                collection.clone(),
                Registration {
                    subscription_id,
                    store_names: store_names.to_vec(),
                    fed_stores,
                    cancel,
                    feed_handle,
                    worker,
                },
            )
        };
        if let Some(raced) = raced {
            raced.teardown(collection).await;
        }

        info!(
            "Subscribed to collection {} ({} stores, subscription {})",
            collection,
            store_names.len(),
            subscription_id
        );
        let _ = self.events.send(SyncEvent::Subscribed {
            collection: collection.clone(),
            subscription_id,
        });
        Ok(subscription_id)
    }

    /// Stops mirroring `collection`. Documents already applied stay in the
    /// store. When this returns, no further batch for the collection will be
    /// applied. Returns false if nothing was subscribed.
    pub async fn unsubscribe(&self, collection: &CollectionId) -> bool {
        let existing = lock(&self.registrations).remove(collection);
        let Some(registration) = existing else {
            return false;
        };
        let subscription_id = registration.subscription_id;
        registration.teardown(collection).await;

        write(&self.state).end_subscription(collection, subscription_id, None);
        info!("Unsubscribed from collection {}", collection);
        let _ = self.events.send(SyncEvent::Unsubscribed {
            collection: collection.clone(),
        });
        true
    }

    /// Unsubscribes and truncates every store the listener fed.
    pub async fn unsubscribe_and_truncate(&self, collection: &CollectionId) -> bool {
        let stores = self.fed_stores(collection);
        let was_subscribed = self.unsubscribe(collection).await;
        for store in &stores {
            self.store.truncate(store);
        }
        write(&self.state).reset_ready(collection);
        was_subscribed
    }

    /// Unsubscribes every collection.
    pub async fn unsubscribe_all(&self) {
        let collections: Vec<CollectionId> = lock(&self.registrations).keys().cloned().collect();
        for collection in collections {
            self.unsubscribe(&collection).await;
        }
    }

    /// Clears one store.
    pub fn truncate(&self, store: &StoreName) {
        self.store.truncate(store);
    }

    /// Clears every store.
    pub fn truncate_all(&self) {
        self.store.truncate_all();
    }

    // ── Readiness & status ───────────────────────────────────────

    /// Resolves once the collection's initial snapshot has been applied;
    /// immediately if it already has. Never resolves for a collection that is
    /// never subscribed or whose feed never marks its initial snapshot.
    pub async fn ready(&self, collection: &CollectionId) {
        let mut ready = write(&self.state).ready_receiver(collection);
        // The sender lives in the engine's state, so this only errors after
        // the engine is gone.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Whether the initial snapshot has been applied since the last subscribe.
    pub fn is_ready(&self, collection: &CollectionId) -> bool {
        read(&self.state).is_ready(collection)
    }

    pub fn status(&self, collection: &CollectionId) -> ListenerStatus {
        read(&self.state).status(collection)
    }

    pub fn listener_state(&self, collection: &CollectionId) -> ListenerState {
        self.status(collection).state
    }

    /// Collections with a live registration.
    pub fn subscribed_collections(&self) -> Vec<CollectionId> {
        lock(&self.registrations).keys().cloned().collect()
    }

    /// Stores the collection's listener has written to or was declared with.
    pub fn fed_stores(&self, collection: &CollectionId) -> Vec<StoreName> {
        lock(&self.registrations)
            .get(collection)
            .map(|r| {
                let mut stores: HashSet<StoreName> = r.store_names.iter().cloned().collect();
                stores.extend(lock(&r.fed_stores).iter().cloned());
                stores.into_iter().collect()
            })
            .unwrap_or_default()
    }

    // ── Consumer reads ───────────────────────────────────────────

    /// Documents effective at `instant` (now when `None`). Empty, never an
    /// error, when nothing matches or nothing has been loaded yet.
    pub fn resolve(
        &self,
        store: &StoreName,
        predicate: Option<&Predicate>,
        instant: Option<Timestamp>,
    ) -> Vec<Document> {
        self.resolver.resolve(store, predicate, instant)
    }

    /// A store's raw contents in arrival order.
    pub fn list(&self, store: &StoreName) -> Vec<Document> {
        self.store.list(store)
    }

    /// Closes all but the newest open version of a key.
    pub fn repair(&self, store: &StoreName, key: &BusinessKey) -> Vec<DocumentId> {
        self.classifier.close_superseded(&self.store, store, key)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let registrations: Vec<Registration> =
            lock(&self.registrations).drain().map(|(_, r)| r).collect();
        for registration in registrations {
            registration.cancel.send_replace(true);
            registration.feed_handle.cancel();
        }
    }
}

/// The per-collection worker.
struct Listener {
    collection: CollectionId,
    subscription_id: SubscriptionId,
    declared: HashSet<StoreName>,
    fed_stores: Arc<Mutex<HashSet<StoreName>>>,
    classifier: DeltaClassifier,
    store: Arc<LocalStore>,
    state: Arc<RwLock<SyncState>>,
    events: broadcast::Sender<SyncEvent>,
    registrations: Registrations,
}

impl Listener {
    async fn run(
        self,
        mut queue: mpsc::Receiver<FeedMessage>,
        mut cancelled: watch::Receiver<bool>,
    ) {
        debug!("Listener for {} started", self.collection);
        loop {
            let message = tokio::select! {
                biased;
                _ = cancelled.changed() => break,
                message = queue.recv() => message,
            };
            match message {
                Some(FeedMessage::Batch(batch)) => self.apply_batch(batch),
                Some(FeedMessage::Error(cause)) => {
                    self.fail(cause);
                    break;
                }
                None => {
                    self.fail("change feed closed".to_string());
                    break;
                }
            }
        }
        debug!("Listener for {} stopped", self.collection);
    }

    fn apply_batch(&self, batch: ChangeBatch) {
        let now = Timestamp::now();
        let total = batch.len();
        let mut applied = 0;
        let mut rejected = 0;

        for change in batch.changes {
            let id = change.document.id.clone();
            match self.apply_change(change, now) {
                Ok(()) => applied += 1,
                Err(e) => {
                    rejected += 1;
                    warn!("Rejected document {} from {}: {}", id, self.collection, e);
                    let _ = self.events.send(SyncEvent::DocumentRejected {
                        collection: self.collection.clone(),
                        document_id: id,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let outcome = write(&self.state).record_batch(
            &self.collection,
            self.subscription_id,
            applied,
            rejected,
            batch.initial_snapshot,
        );
        info!(
            "Applied {}/{} changes for collection {}{}",
            applied,
            total,
            self.collection,
            if batch.initial_snapshot { " (initial snapshot)" } else { "" }
        );

        let _ = self.events.send(SyncEvent::BatchApplied {
            collection: self.collection.clone(),
            applied,
            rejected,
            initial_snapshot: batch.initial_snapshot,
        });
        if outcome.became_ready {
            info!("Collection {} is ready", self.collection);
            let _ = self.events.send(SyncEvent::Ready {
                collection: self.collection.clone(),
            });
        }
    }

    fn apply_change(&self, change: Change, now: Timestamp) -> ClassifyResult<()> {
        match change.change_type {
            ChangeType::Added | ChangeType::Modified => {
                let doc = self
                    .classifier
                    .prepare(&self.collection, change.document, now)?;
                if !self.declared.is_empty() && !self.declared.contains(&doc.store_name) {
                    return Err(ClassifyError::ForeignStore {
                        id: doc.id,
                        store: doc.store_name,
                    });
                }
                let (id, target) = (doc.id.clone(), doc.store_name.clone());
                let others: Vec<StoreName> = {
                    let mut fed = lock(&self.fed_stores);
                    fed.insert(target.clone());
                    fed.iter().filter(|s| **s != target).cloned().collect()
                };
                let delta = self.classifier.apply(&self.store, doc)?;
                debug!("{:?} from collection {}", delta, self.collection);

                // A document that changed store must not stay behind in the old one.
                for store in &others {
                    if self.store.remove_by_id(store, &id).is_some() {
                        debug!("Document {} moved from store {} to {}", id, store, target);
                    }
                }
                Ok(())
            }
            ChangeType::Removed => {
                let hint = self.store_hint(&change);
                if let Some(store) = hint.as_ref() {
                    if !self.declared.is_empty() && !self.declared.contains(store) {
                        return Err(ClassifyError::ForeignStore {
                            id: change.document.id,
                            store: store.clone(),
                        });
                    }
                }
                self.remove(&change.document.id, hint);
                Ok(())
            }
        }
    }

    fn store_hint(&self, change: &Change) -> Option<StoreName> {
        let field = &self.classifier.catalog().layout().store_field;
        change
            .document
            .get(field)
            .and_then(|v| v.as_str())
            .map(StoreName::from)
    }

    /// Removes `id` from the hinted store, or from whichever fed store holds
    /// it. Unknown ids are ignored so replayed removals are harmless.
    fn remove(&self, id: &DocumentId, hint: Option<StoreName>) {
        let candidates: Vec<StoreName> = match hint {
            Some(store) => vec![store],
            None => lock(&self.fed_stores).iter().cloned().collect(),
        };
        for store in &candidates {
            if self.store.remove_by_id(store, id).is_some() {
                debug!("Removed document {} from store {}", id, store);
                return;
            }
        }
        debug!("Removal of unknown document {} ignored", id);
    }

    fn fail(&self, cause: String) {
        warn!("Change feed for collection {} failed: {}", self.collection, cause);
        let owned = write(&self.state).end_subscription(
            &self.collection,
            self.subscription_id,
            Some(cause.clone()),
        );
        if !owned {
            return;
        }

        let removed = {
            let mut registrations = lock(&self.registrations);
            match registrations.get(&self.collection) {
                Some(r) if r.subscription_id == self.subscription_id => {
                    registrations.remove(&self.collection)
                }
                _ => None,
            }
        };
        if let Some(registration) = removed {
            registration.feed_handle.cancel();
        }

        let _ = self.events.send(SyncEvent::TransportError {
            collection: self.collection.clone(),
            cause,
        });
    }
}

//! Change-feed boundary.
//!
//! The remote collection's transport lives outside this crate. It is plugged
//! in through [`ChangeFeed`]: the engine hands the feed the sending half of a
//! bounded per-collection queue and the feed pushes [`FeedMessage`]s into it
//! until the returned [`FeedHandle`] is cancelled.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempus_model::RawDocument;
use tempus_types::CollectionId;
use tokio::sync::mpsc;

/// How a document changed on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One change event within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    pub document: RawDocument,
}

impl Change {
    pub fn added(document: RawDocument) -> Self {
        Self {
            change_type: ChangeType::Added,
            document,
        }
    }

    pub fn modified(document: RawDocument) -> Self {
        Self {
            change_type: ChangeType::Modified,
            document,
        }
    }

    pub fn removed(document: RawDocument) -> Self {
        Self {
            change_type: ChangeType::Removed,
            document,
        }
    }
}

/// An ordered group of changes delivered together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub changes: Vec<Change>,
    /// Set by the feed on the batch that completes the initial snapshot.
    /// An empty batch with this flag is a valid "ready" signal.
    #[serde(default)]
    pub initial_snapshot: bool,
}

impl ChangeBatch {
    /// A live-update batch.
    pub fn new(changes: Vec<Change>) -> Self {
        Self {
            changes,
            initial_snapshot: false,
        }
    }

    /// The batch completing the initial snapshot.
    pub fn snapshot(changes: Vec<Change>) -> Self {
        Self {
            changes,
            initial_snapshot: true,
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What a feed can push into a listener's queue.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Batch(ChangeBatch),
    /// The feed failed; the listener is torn down after this.
    Error(String),
}

/// Sending half of a listener's batch queue.
pub type FeedSender = mpsc::Sender<FeedMessage>;

/// Cancels a feed subscription when cancelled or dropped.
pub struct FeedHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedHandle {
    /// Wraps a transport-specific cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle for feeds that stop on their own once the queue closes.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Stops delivery.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A remote change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Starts delivering `collection`'s changes into `sink`. Delivery must
    /// stop once the returned handle is cancelled; anything sent after that
    /// is discarded by the engine.
    async fn subscribe(
        &self,
        collection: &CollectionId,
        sink: FeedSender,
    ) -> SyncResult<FeedHandle>;
}

/// A mock feed for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    #[derive(Default)]
    struct Inner {
        sinks: HashMap<CollectionId, (u64, FeedSender)>,
        generation: u64,
        subscribe_calls: HashMap<CollectionId, usize>,
        refuse: HashSet<CollectionId>,
    }

    fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
        inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// An in-process feed driven by the test.
    #[derive(Clone, Default)]
    pub struct MockFeed {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockFeed {
        /// Creates a new mock feed.
        pub fn new() -> Self {
            Self::default()
        }

        fn sink(&self, collection: &CollectionId) -> Option<FeedSender> {
            lock(&self.inner).sinks.get(collection).map(|(_, s)| s.clone())
        }

        /// Queues a batch without waiting. Returns false if the collection
        /// has no live subscription or its queue is full.
        pub fn push(&self, collection: &CollectionId, batch: ChangeBatch) -> bool {
            match self.sink(collection) {
                Some(sink) => sink.try_send(FeedMessage::Batch(batch)).is_ok(),
                None => false,
            }
        }

        /// Queues a batch, waiting for queue space.
        pub async fn deliver(&self, collection: &CollectionId, batch: ChangeBatch) -> bool {
            match self.sink(collection) {
                Some(sink) => sink.send(FeedMessage::Batch(batch)).await.is_ok(),
                None => false,
            }
        }

        /// Reports a transport failure on a collection.
        pub async fn fail(&self, collection: &CollectionId, cause: impl Into<String>) -> bool {
            match self.sink(collection) {
                Some(sink) => sink.send(FeedMessage::Error(cause.into())).await.is_ok(),
                None => false,
            }
        }

        /// Ends a collection's stream without an error message.
        pub fn close(&self, collection: &CollectionId) {
            lock(&self.inner).sinks.remove(collection);
        }

        /// Makes the next subscribe calls for `collection` fail.
        pub fn refuse(&self, collection: &CollectionId) {
            lock(&self.inner).refuse.insert(collection.clone());
        }

        /// Whether the collection has a sink whose listener is still reading.
        pub fn is_subscribed(&self, collection: &CollectionId) -> bool {
            self.sink(collection).is_some_and(|s| !s.is_closed())
        }

        /// How many times `subscribe` was called for a collection.
        pub fn subscribe_calls(&self, collection: &CollectionId) -> usize {
            lock(&self.inner)
                .subscribe_calls
                .get(collection)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ChangeFeed for MockFeed {
        async fn subscribe(
            &self,
            collection: &CollectionId,
            sink: FeedSender,
        ) -> SyncResult<FeedHandle> {
            let mut inner = lock(&self.inner);
            *inner.subscribe_calls.entry(collection.clone()).or_default() += 1;
            if inner.refuse.contains(collection) {
                return Err(SyncError::Transport {
                    collection: collection.clone(),
                    cause: "subscription refused".into(),
                });
            }
            inner.generation += 1;
            let generation = inner.generation;
            inner.sinks.insert(collection.clone(), (generation, sink));
            drop(inner);

            let shared = self.inner.clone();
            let collection = collection.clone();
            Ok(FeedHandle::new(move || {
                let mut inner = lock(&shared);
                // A later subscription may already own the slot.
                if inner.sinks.get(&collection).is_some_and(|(g, _)| *g == generation) {
                    inner.sinks.remove(&collection);
                }
            }))
        }
    }
}

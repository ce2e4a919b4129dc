//! Delta classifier - decides how an incoming document changes a store.
//!
//! For every added or modified document the classifier projects it onto its
//! collection's matching fields and compares it with the versions of the same
//! business key already in the store:
//!
//! - the store already holds this `id` → replace it in place
//! - no open version of the key → insert as a new entity
//! - one open version → the newer of the two (by `effective_from`, then `id`)
//!   stays open and the older is closed at the newer one's `effective_from`
//! - several open versions → [`ClassifyError::MultipleOpenVersions`]; nothing
//!   is written and [`DeltaClassifier::close_superseded`] is left to the caller
//!
//! Scanning and mutating happen under a single store lock.

use std::cmp::Ordering;
use std::sync::Arc;
use tempus_model::{BusinessKey, Catalog, Document, ModelError, RawDocument};
use tempus_store::{LocalStore, StoreError, StoreTxn};
use tempus_types::{CollectionId, DocumentId, StoreName, Timestamp};
use tracing::{debug, info};

/// Result type for classifier operations.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Per-document failures. None of them abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("malformed document: {0}")]
    Malformed(#[from] ModelError),

    #[error("document {id} targets store {store}, which this listener does not feed")]
    ForeignStore { id: DocumentId, store: StoreName },

    #[error("store {store} holds {} open versions of key {key}", ids.len())]
    MultipleOpenVersions {
        store: StoreName,
        key: BusinessKey,
        ids: Vec<DocumentId>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse category of a [`ClassifyError`], reported in engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    MalformedDocument,
    MultipleOpenVersions,
    DuplicateIdentity,
    /// The store itself failed (serialization or backend).
    StoreFailure,
}

impl ClassifyError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            ClassifyError::Malformed(_) | ClassifyError::ForeignStore { .. } => {
                RejectionKind::MalformedDocument
            }
            ClassifyError::MultipleOpenVersions { .. } => RejectionKind::MultipleOpenVersions,
            ClassifyError::Store(StoreError::DuplicateIdentity { .. }) => {
                RejectionKind::DuplicateIdentity
            }
            ClassifyError::Store(StoreError::StoreMismatch { .. }) => {
                RejectionKind::MalformedDocument
            }
            ClassifyError::Store(_) => RejectionKind::StoreFailure,
        }
    }
}

/// The store-level effect of classifying one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// First version of a new logical entity.
    Insert(DocumentId),
    /// A new version arrived; the previously open version was closed.
    Supersede {
        previous: DocumentId,
        closed_at: Timestamp,
        current: DocumentId,
    },
    /// A version older than the open one arrived late and was stored closed.
    Backfill {
        id: DocumentId,
        closed_at: Timestamp,
    },
    /// The same version was updated in place.
    Replace(DocumentId),
}

/// Classifies documents against the catalog's matching-field sets.
#[derive(Clone)]
pub struct DeltaClassifier {
    catalog: Arc<Catalog>,
}

impl DeltaClassifier {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Validates a raw feed document and computes its business key.
    pub fn prepare(
        &self,
        collection: &CollectionId,
        raw: RawDocument,
        now: Timestamp,
    ) -> ClassifyResult<Document> {
        Ok(self.catalog.document_from_raw(collection, raw, now)?)
    }

    /// Validates and applies a raw feed document in one step.
    pub fn classify(
        &self,
        store: &LocalStore,
        collection: &CollectionId,
        raw: RawDocument,
        now: Timestamp,
    ) -> ClassifyResult<Delta> {
        let doc = self.prepare(collection, raw, now)?;
        self.apply(store, doc)
    }

    /// Applies an already validated document to its store.
    pub fn apply(&self, store: &LocalStore, doc: Document) -> ClassifyResult<Delta> {
        let store_name = doc.store_name.clone();
        store.transact(&store_name, |txn| apply_in(txn, doc))
    }

    /// Caller-driven repair for [`ClassifyError::MultipleOpenVersions`]:
    /// closes every open version of `key` except the newest, each at the
    /// `effective_from` of the next newer one. Returns the closed ids.
    pub fn close_superseded(
        &self,
        store: &LocalStore,
        store_name: &StoreName,
        key: &BusinessKey,
    ) -> Vec<DocumentId> {
        let closed = store.transact(store_name, |txn| {
            let mut open: Vec<(DocumentId, Timestamp)> = txn
                .documents()
                .iter()
                .filter(|d| d.is_open() && &d.key == key)
                .map(|d| (d.id.clone(), d.effective_from))
                .collect();
            open.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            let mut closed = Vec::new();
            for pair in open.windows(2) {
                let (older, newer) = (&pair[0], &pair[1]);
                if txn.close_version(&older.0, newer.1) {
                    closed.push(older.0.clone());
                }
            }
            closed
        });
        if !closed.is_empty() {
            info!("Closed {} superseded versions of {} in store {}", closed.len(), key, store_name);
        }
        closed
    }
}

enum Plan {
    Plain,
    Supersede(DocumentId, Timestamp),
    Backfill(Timestamp),
}

fn apply_in(txn: &mut StoreTxn<'_>, mut doc: Document) -> ClassifyResult<Delta> {
    let previous = txn.get(&doc.id).map(|d| d.effective_to);
    if let Some(Some(local_close)) = previous {
        // A version we closed locally stays closed when the remote copy of it
        // changes without saying anything about its end, unless its start
        // moved past that close.
        if doc.effective_to.is_none() && local_close >= doc.effective_from {
            doc.effective_to = Some(local_close);
        }
    }

    let open: Vec<&Document> = txn
        .documents()
        .iter()
        .filter(|d| d.id != doc.id && d.key == doc.key && d.is_open())
        .collect();

    let plan = match open.as_slice() {
        _ if doc.effective_to.is_some() => Plan::Plain,
        [] => Plan::Plain,
        [current] => match doc.version_cmp(current) {
            Ordering::Greater => Plan::Supersede(current.id.clone(), doc.effective_from),
            _ => Plan::Backfill(current.effective_from),
        },
        many => {
            return Err(ClassifyError::MultipleOpenVersions {
                store: txn.store_name().clone(),
                key: doc.key.clone(),
                ids: many.iter().map(|d| d.id.clone()).collect(),
            });
        }
    };

    if previous.is_some() {
        txn.remove_by_id(&doc.id);
    }

    let id = doc.id.clone();
    let delta = match plan {
        Plan::Plain if previous.is_some() => Delta::Replace(id.clone()),
        Plan::Plain => Delta::Insert(id.clone()),
        Plan::Supersede(prev, at) => {
            txn.close_version(&prev, at);
            Delta::Supersede {
                previous: prev,
                closed_at: at,
                current: id.clone(),
            }
        }
        Plan::Backfill(at) => {
            doc.effective_to = Some(at);
            Delta::Backfill {
                id: id.clone(),
                closed_at: at,
            }
        }
    };

    txn.insert(doc)?;
    debug!("Classified document {} in store {}: {:?}", id, txn.store_name(), delta);
    Ok(delta)
}

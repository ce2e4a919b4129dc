//! Engine notifications.

use crate::classifier::RejectionKind;
use tempus_types::{CollectionId, DocumentId, SubscriptionId};

/// Something the engine wants callers to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Subscribed {
        collection: CollectionId,
        subscription_id: SubscriptionId,
    },
    BatchApplied {
        collection: CollectionId,
        applied: usize,
        rejected: usize,
        initial_snapshot: bool,
    },
    /// The initial snapshot has been fully applied.
    Ready { collection: CollectionId },
    /// One document was skipped; the rest of its batch was still applied.
    DocumentRejected {
        collection: CollectionId,
        document_id: DocumentId,
        kind: RejectionKind,
        reason: String,
    },
    /// The change feed failed and the registration was torn down.
    TransportError {
        collection: CollectionId,
        cause: String,
    },
    Unsubscribed { collection: CollectionId },
}

impl SyncEvent {
    /// The collection the event concerns.
    pub fn collection(&self) -> &CollectionId {
        match self {
            SyncEvent::Subscribed { collection, .. }
            | SyncEvent::BatchApplied { collection, .. }
            | SyncEvent::Ready { collection }
            | SyncEvent::DocumentRejected { collection, .. }
            | SyncEvent::TransportError { collection, .. }
            | SyncEvent::Unsubscribed { collection } => collection,
        }
    }
}

//! Error types for the sync layer.

use tempus_types::CollectionId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a listener registration or a lifecycle call.
///
/// Per-document problems never surface here; they are reported as
/// [`crate::ClassifyError`]s and the batch carries on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The change feed failed. The registration has been torn down and is
    /// not retried.
    #[error("transport error on collection {collection}: {cause}")]
    Transport {
        collection: CollectionId,
        cause: String,
    },

    /// The collection has no entry in the catalog.
    #[error("collection {0} is not configured")]
    UnknownCollection(CollectionId),
}

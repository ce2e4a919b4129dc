//! Error types for the store layer.

use tempus_types::{DocumentId, StoreName};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with the same id is already in the store.
    #[error("document {id} already exists in store {store}")]
    DuplicateIdentity { store: StoreName, id: DocumentId },

    /// The document names a different store than the one written to.
    #[error("document {id} belongs to store {found}, not {expected}")]
    StoreMismatch {
        id: DocumentId,
        expected: StoreName,
        found: StoreName,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The external key-value backend failed.
    #[error("persistence backend error: {0}")]
    Backend(String),
}

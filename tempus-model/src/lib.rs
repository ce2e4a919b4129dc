//! Document model for tempus.
//!
//! Defines the types every other tempus crate depends on:
//! - [`Document`]: one time-bounded version of a logical entity
//! - [`BusinessKey`]: the projection of a document onto its collection's
//!   matching fields, identifying "the same thing" across versions
//! - [`RawDocument`]: a document as delivered by the change feed, before
//!   validation
//! - [`StoreSchema`]: the typed payload shape expected for one store name
//! - [`Catalog`]: the immutable bootstrap configuration (matching fields,
//!   sort criteria, schemas, field layout)

mod catalog;
mod document;
mod schema;

pub use catalog::{compare_json, Catalog, CollectionConfig, FieldLayout, SortDirection, SortField};
pub use document::{field_value, BusinessKey, Document, RawDocument};
pub use schema::{FieldSpec, FieldType, StoreSchema};

use tempus_types::{CollectionId, DocumentId};

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while turning raw feed documents into [`Document`]s or
/// while loading a [`Catalog`].
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("collection {0} is not configured")]
    UnknownCollection(CollectionId),

    #[error("document {id} has no store name")]
    MissingStore { id: DocumentId },

    #[error("document {id} has no value for matching field {field}")]
    UnresolvableKey { id: DocumentId, field: String },

    #[error("document {id} field {field}: {reason}")]
    InvalidField {
        id: DocumentId,
        field: String,
        reason: String,
    },

    #[error("catalog parse error: {0}")]
    Json(#[from] serde_json::Error),
}

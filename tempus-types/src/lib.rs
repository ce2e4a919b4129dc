//! Core type definitions for tempus.
//!
//! This crate defines the fundamental types shared by the store, resolver
//! and sync engine:
//! - Remote-assigned document identifiers and collection / store names
//! - Locally generated subscription identifiers (UUID v7)
//! - Millisecond [`Timestamp`]s used for effective-time bounds
//!
//! Collection-specific payload shapes live in `tempus-model`, not here.

mod ids;
mod timestamp;

pub use ids::{CollectionId, DocumentId, StoreName, SubscriptionId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

//! Change-feed sync engine for tempus.
//!
//! Keeps a [`LocalStore`](tempus_store::LocalStore) in step with remote
//! collections that publish document changes in batches.
//!
//! # Architecture
//!
//! - **Feed**: the [`ChangeFeed`] boundary a transport implements
//! - **Classifier**: decides whether a document inserts, supersedes or
//!   replaces what the store holds for its business key
//! - **State**: per-collection listener lifecycle and readiness
//! - **Engine**: owns one listener per collection and the consumer read API
//!
//! ## Listener lifecycle
//!
//! 1. **Subscribe**: any previous registration for the collection is torn
//!    down and a fresh bounded queue is handed to the feed
//! 2. **Apply**: batches are drained in order, one at a time; a bad
//!    document is skipped and the rest of its batch still lands
//! 3. **Ready**: the batch flagged as the initial snapshot releases
//!    [`SyncEngine::ready`] waiters
//! 4. **Teardown**: an explicit unsubscribe or a transport error ends the
//!    registration; transport errors are not retried
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use tempus_model::{Catalog, CollectionConfig, RawDocument};
//! use tempus_sync::mock::MockFeed;
//! use tempus_sync::{Change, ChangeBatch, SyncConfig, SyncEngine};
//! use tempus_types::{CollectionId, StoreName};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tempus_sync::SyncResult<()> {
//! let catalog = Catalog::new().with_collection("prices", CollectionConfig::new(["code"]));
//! let feed = MockFeed::new();
//! let engine = SyncEngine::new(Arc::new(catalog), Arc::new(feed.clone()), SyncConfig::default());
//!
//! let prices = CollectionId::new("prices");
//! engine.subscribe(&prices, &[]).await?;
//! feed.push(
//!     &prices,
//!     ChangeBatch::snapshot(vec![Change::added(RawDocument::new(
//!         "p1",
//!         json!({ "storeName": "eu", "code": "A", "effectiveFrom": 0 }),
//!     ))]),
//! );
//! engine.ready(&prices).await;
//!
//! assert_eq!(engine.resolve(&StoreName::new("eu"), None, None).len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
mod engine;
mod error;
mod events;
pub mod feed;
pub mod state;

pub use classifier::{ClassifyError, ClassifyResult, Delta, DeltaClassifier, RejectionKind};
pub use engine::{SyncConfig, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use feed::{
    mock, Change, ChangeBatch, ChangeFeed, ChangeType, FeedHandle, FeedMessage, FeedSender,
};
pub use state::{BatchOutcome, ListenerState, ListenerStatus, SyncState};

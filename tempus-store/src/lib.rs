//! Local document store for tempus.
//!
//! Mirrors remote collections into per-store ordered lists held in memory.
//!
//! # Architecture
//!
//! - Each store name owns its own lock, so listeners feeding unrelated
//!   stores never serialize on each other
//! - Lists keep arrival order; temporal order is imposed by the [`Resolver`]
//! - Every mutation is broadcast to watchers of that store, in mutation order
//! - Durable persistence is opt-in through the [`KeyValueStore`] boundary

mod error;
mod local_store;
mod persistence;
mod predicate;
mod resolver;

pub use error::{StoreError, StoreResult};
pub use local_store::{ChangeKind, LocalStore, StoreChange, StoreTxn, DEFAULT_NOTIFY_CAPACITY};
pub use persistence::{store_key, KeyValueStore, MemoryKeyValueStore};
pub use predicate::Predicate;
pub use resolver::Resolver;

//! As-at resolution.
//!
//! Given a store, an optional predicate and an instant, returns the
//! documents whose half-open interval `[effective_from, effective_to)`
//! contains the instant, ordered by the store's configured sort criteria
//! (arrival order when none are configured).

use crate::local_store::LocalStore;
use crate::predicate::Predicate;
use std::cmp::Ordering;
use std::sync::Arc;
use tempus_model::{BusinessKey, Catalog, Document};
use tempus_types::{StoreName, Timestamp};
use tracing::debug;

/// Read-side view over a [`LocalStore`].
#[derive(Clone)]
pub struct Resolver {
    store: Arc<LocalStore>,
    catalog: Arc<Catalog>,
}

impl Resolver {
    pub fn new(store: Arc<LocalStore>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    /// Documents effective at `instant` (now when `None`).
    pub fn resolve(
        &self,
        store: &StoreName,
        predicate: Option<&Predicate>,
        instant: Option<Timestamp>,
    ) -> Vec<Document> {
        let instant = instant.unwrap_or_else(Timestamp::now);
        let mut found: Vec<Document> = self.store.read(store, |docs| {
            docs.iter()
                .filter(|d| d.is_effective_at(instant))
                .filter(|d| predicate.is_none_or(|p| p.matches(d)))
                .cloned()
                .collect()
        });

        let sort = self.catalog.sort_for(store);
        if !sort.is_empty() {
            found.sort_by(|a, b| {
                sort.iter()
                    .map(|field| field.compare(a, b))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        debug!("Resolved {} documents in store {} at {}", found.len(), store, instant);
        found
    }

    /// Documents effective right now.
    pub fn resolve_now(&self, store: &StoreName, predicate: Option<&Predicate>) -> Vec<Document> {
        self.resolve(store, predicate, None)
    }

    /// The single version of `key` effective at `instant`, if any. When the
    /// store holds several (a deliberately non-exclusive configuration), the
    /// newest by `effective_from` then `id` wins.
    pub fn resolve_key(
        &self,
        store: &StoreName,
        key: &BusinessKey,
        instant: Option<Timestamp>,
    ) -> Option<Document> {
        let predicate = Predicate::Key(key.clone());
        self.resolve(store, Some(&predicate), instant)
            .into_iter()
            .max_by(Document::version_cmp)
    }

    /// Every version of `key` ordered by `effective_from`, then `id`.
    pub fn history(&self, store: &StoreName, key: &BusinessKey) -> Vec<Document> {
        let mut versions: Vec<Document> = self.store.read(store, |docs| {
            docs.iter().filter(|d| &d.key == key).cloned().collect()
        });
        versions.sort_by(Document::version_cmp);
        versions
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }
}

//! In-memory entity store for fast, deterministic tests.
//!
//! - [`InMemoryEntityStore`]: `BTreeMap`-backed [`EntityStore`] with the same
//!   atomic, version-checked commit semantics as a real backend
//! - [`Fault`]: failures that can be injected into upcoming commits

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning is the only panic

use parkgrid_core::entity::Entity;
use parkgrid_core::key::EntityKey;
use parkgrid_core::store::{
    EntityStore, ListQuery, Mutation, Page, PageToken, StoreError, StoreFuture, Version,
    Versioned, WriteBatch,
};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

/// A failure to inject into a future commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a `Conflict` on the batch's first key, as if another
    /// writer got there first.
    Conflict,
    /// Fail with a `Backend` error.
    Backend(String),
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, Versioned<Entity>>,
    faults: VecDeque<Fault>,
    commits: u64,
    rejected: u64,
}

/// In-memory entity store for fast, deterministic testing.
///
/// Records are kept in canonical key order, so `list` pages the same way the
/// Postgres store does. A commit checks every precondition before writing
/// anything.
///
/// # Example
///
/// ```
/// use parkgrid_testing::InMemoryEntityStore;
/// use parkgrid_core::store::EntityStore;
/// use parkgrid_core::entity::Campus;
/// use parkgrid_core::key::CampusKey;
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEntityStore::new();
/// let key = CampusKey::new("north")?;
///
/// store.put(Campus::new(key.clone(), Utc::now()).into()).await?;
/// assert!(store.exists(key.into()).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEntityStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEntityStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each of the next `times` commits fail with `fault`.
    ///
    /// Failed commits write nothing.
    pub fn inject(&self, fault: Fault, times: usize) {
        let mut inner = self.inner.write().unwrap();
        inner.faults.extend(std::iter::repeat_n(fault, times));
    }

    /// Number of commits that were applied
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.inner.read().unwrap().commits
    }

    /// Number of commits that were rejected (injected or real conflicts)
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.inner.read().unwrap().rejected
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().records.is_empty()
    }

    /// Canonical keys of every stored record, in order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().unwrap().records.keys().cloned().collect()
    }

    /// Every stored record, in key order
    ///
    /// Useful for asserting that a failed operation changed nothing.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Versioned<Entity>> {
        self.inner.read().unwrap().records.values().cloned().collect()
    }

    /// Clear all records and pending faults (for test isolation)
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.records.clear();
        inner.faults.clear();
    }

    fn apply(inner: &mut Inner, batch: WriteBatch) -> Result<(), StoreError> {
        batch.ensure_unique_keys()?;

        if let Some(fault) = inner.faults.pop_front() {
            return Err(match fault {
                Fault::Backend(message) => StoreError::Backend(message),
                Fault::Conflict => {
                    let key = batch
                        .mutations()
                        .first()
                        .map(Mutation::key)
                        .ok_or_else(|| StoreError::InvalidBatch("empty batch".into()))?;
                    let actual = inner.records.get(&key.to_string()).map(|r| r.version);
                    StoreError::Conflict {
                        key,
                        expected: actual.map(Version::next),
                        actual,
                    }
                }
            });
        }

        for mutation in batch.mutations() {
            let key = mutation.key();
            let current = inner.records.get(&key.to_string()).map(|r| r.version);
            mutation.precondition().check(&key, current)?;
        }

        for mutation in batch.into_mutations() {
            match mutation {
                Mutation::Put { entity, .. } => {
                    let key = entity.key().to_string();
                    let version = inner
                        .records
                        .get(&key)
                        .map_or(Version::FIRST, |r| r.version.next());
                    inner.records.insert(key, Versioned::new(version, entity));
                }
                Mutation::Delete { key, .. } => {
                    inner.records.remove(&key.to_string());
                }
            }
        }
        Ok(())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn get(&self, key: EntityKey) -> StoreFuture<'_, Option<Versioned<Entity>>> {
        Box::pin(async move {
            Ok(self
                .inner
                .read()
                .unwrap()
                .records
                .get(&key.to_string())
                .cloned())
        })
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, Page<Versioned<Entity>>> {
        Box::pin(async move {
            let inner = self.inner.read().unwrap();
            let limit = query.effective_limit();
            let start = query
                .page_token
                .as_ref()
                .map_or(Bound::Unbounded, |token| {
                    Bound::Excluded(token.as_str().to_string())
                });

            let mut items: Vec<Versioned<Entity>> = inner
                .records
                .range((start, Bound::Unbounded))
                .map(|(_, record)| record)
                .filter(|record| query.matches(&record.value.key()))
                .take(limit + 1)
                .cloned()
                .collect();

            let next = if items.len() > limit {
                items.truncate(limit);
                items.last().map(|record| PageToken::after(&record.value.key()))
            } else {
                None
            };
            Ok(Page { items, next })
        })
    }

    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap();
            let size = batch.len();
            match Self::apply(&mut inner, batch) {
                Ok(()) => {
                    inner.commits += 1;
                    tracing::trace!(mutations = size, "in-memory commit applied");
                    Ok(())
                }
                Err(error) => {
                    inner.rejected += 1;
                    Err(error)
                }
            }
        })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

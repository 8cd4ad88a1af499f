//! Entity store trait and related types.
//!
//! The store is a key-addressed map from [`EntityKey`] to [`Entity`] with
//! optimistic concurrency control. Every record carries a [`Version`] that
//! increments on each write, and every write in a [`WriteBatch`] states what
//! it expects to find. A batch is applied all-or-nothing.
//!
//! # Design
//!
//! - `get` is always authoritative. There is no cached read path, so a
//!   parent-existence check can never see a stale record.
//! - `commit` is the only mutating primitive; `put` and `delete` are
//!   single-mutation batches.
//! - `list` pages through one kind of record in canonical key order.
//!
//! # Implementations
//!
//! - `InMemoryEntityStore` (in `parkgrid-testing`): fast, deterministic tests
//! - `PostgresEntityStore` (in `parkgrid-postgres`): durable storage
//!
//! # Example
//!
//! ```no_run
//! use parkgrid_core::store::{EntityStore, Precondition, StoreError, WriteBatch};
//! use parkgrid_core::entity::{Campus, Entity};
//! use parkgrid_core::key::CampusKey;
//! use chrono::Utc;
//!
//! async fn example<S: EntityStore>(store: &S) -> Result<(), StoreError> {
//!     let key = CampusKey::new("north").expect("valid name");
//!     let mut batch = WriteBatch::new();
//!     batch.put(Campus::new(key.clone(), Utc::now()).into(), Precondition::Absent);
//!     store.commit(batch).await?;
//!
//!     let loaded = store.get(key.into()).await?;
//!     assert!(loaded.is_some());
//!     Ok(())
//! }
//! ```

use crate::entity::Entity;
use crate::key::{EntityKey, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`EntityStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Largest page a single `list` call returns.
pub const MAX_PAGE_SIZE: usize = 500;

fn describe(version: Option<&Version>) -> String {
    version.map_or_else(|| "absent".to_string(), |v| format!("version {v}"))
}

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A precondition in a batch did not hold; nothing was written.
    ///
    /// `None` on either side means "no record".
    #[error(
        "Concurrency conflict on {key}: expected {}, found {}",
        describe(.expected.as_ref()),
        describe(.actual.as_ref())
    )]
    Conflict {
        /// The key whose precondition failed
        key: EntityKey,
        /// What the writer expected
        expected: Option<Version>,
        /// What the store holds
        actual: Option<Version>,
    },

    /// The batch itself is unusable (e.g. names one key twice).
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Database connection or query failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Record version for optimistic concurrency control.
///
/// The first write of a key produces version 1; every later write adds 1.
/// A deleted key has no version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly inserted record.
    pub const FIRST: Self = Self(1);

    /// Create a version.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after one more write.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A stored value with its current version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Version of the stored record
    pub version: Version,
    /// The record
    pub value: T,
}

impl<T> Versioned<T> {
    /// Pair a value with its version.
    pub const fn new(version: Version, value: T) -> Self {
        Self { version, value }
    }

    /// Transform the value, keeping the version.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            version: self.version,
            value: f(self.value),
        }
    }
}

/// What a mutation expects to find at its key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    /// No expectation (blind write)
    Any,
    /// The key must not exist
    Absent,
    /// The key must exist at exactly this version
    AtVersion(Version),
}

impl Precondition {
    /// Precondition matching a previous read: absent if nothing was read.
    #[must_use]
    pub fn from_read(version: Option<Version>) -> Self {
        version.map_or(Self::Absent, Self::AtVersion)
    }

    /// Checks the precondition against the version currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if it does not hold.
    pub fn check(self, key: &EntityKey, current: Option<Version>) -> Result<(), StoreError> {
        let holds = match self {
            Self::Any => true,
            Self::Absent => current.is_none(),
            Self::AtVersion(expected) => current == Some(expected),
        };
        if holds {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                key: key.clone(),
                expected: match self {
                    Self::AtVersion(expected) => Some(expected),
                    Self::Any | Self::Absent => None,
                },
                actual: current,
            })
        }
    }
}

/// One write in a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Insert or overwrite the record at the entity's key
    Put {
        /// The full record to store
        entity: Entity,
        /// What must be there before the write
        precondition: Precondition,
    },
    /// Remove the record at a key
    Delete {
        /// Key to remove
        key: EntityKey,
        /// What must be there before the delete
        precondition: Precondition,
    },
}

impl Mutation {
    /// Key the mutation touches.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Put { entity, .. } => entity.key(),
            Self::Delete { key, .. } => key.clone(),
        }
    }

    /// The mutation's precondition.
    #[must_use]
    pub const fn precondition(&self) -> Precondition {
        match self {
            Self::Put { precondition, .. } | Self::Delete { precondition, .. } => *precondition,
        }
    }
}

/// A set of mutations applied atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    /// An empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mutations: Vec::new(),
        }
    }

    /// Adds a put.
    pub fn put(&mut self, entity: Entity, precondition: Precondition) -> &mut Self {
        self.mutations.push(Mutation::Put {
            entity,
            precondition,
        });
        self
    }

    /// Adds a delete.
    pub fn delete(&mut self, key: EntityKey, precondition: Precondition) -> &mut Self {
        self.mutations.push(Mutation::Delete { key, precondition });
        self
    }

    /// Number of mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// The mutations in insertion order.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Consumes the batch.
    #[must_use]
    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    /// Ensures no key appears twice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidBatch`] naming the repeated key.
    pub fn ensure_unique_keys(&self) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(self.mutations.len());
        for mutation in &self.mutations {
            let key = mutation.key();
            if !seen.insert(key.to_string()) {
                return Err(StoreError::InvalidBatch(format!(
                    "key {key} appears more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Opaque continuation token returned by [`EntityStore::list`].
///
/// Callers pass it back unchanged to fetch the next page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageToken(String);

impl PageToken {
    /// Token resuming after `key`.
    #[must_use]
    pub fn after(key: &EntityKey) -> Self {
        Self(key.to_string())
    }

    /// Token from its string form, as previously handed out.
    #[must_use]
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// String form to hand to clients.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Token for the next page; `None` on the last page
    pub next: Option<PageToken>,
}

impl<T> Page<T> {
    /// Transform every item.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
        }
    }

    /// A page with no items and no continuation.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }
}

/// Parameters of a `list` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    /// Kind of record to return
    pub kind: EntityKind,
    /// Restrict to descendants of this key
    pub parent: Option<EntityKey>,
    /// Resume after the page this token ended
    pub page_token: Option<PageToken>,
    /// Page size, clamped to `1..=MAX_PAGE_SIZE`
    pub limit: usize,
}

impl ListQuery {
    /// All records of `kind`, first page of `limit` items.
    #[must_use]
    pub const fn new(kind: EntityKind, limit: usize) -> Self {
        Self {
            kind,
            parent: None,
            page_token: None,
            limit,
        }
    }

    /// Only descendants of `parent`.
    #[must_use]
    pub fn under(mut self, parent: EntityKey) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Continue from a token.
    #[must_use]
    pub fn after(mut self, page_token: Option<PageToken>) -> Self {
        self.page_token = page_token;
        self
    }

    /// Page size after clamping.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    /// Whether a record with this canonical key belongs in the result.
    ///
    /// Ordering and token checks are left to the backend.
    #[must_use]
    pub fn matches(&self, key: &EntityKey) -> bool {
        key.kind() == self.kind
            && self
                .parent
                .as_ref()
                .is_none_or(|parent| parent.is_ancestor_of(key))
    }
}

/// Key-addressed persistence for campuses, lots and spaces.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// concurrent caller.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of `async fn` so the store can be
/// held as `Arc<dyn EntityStore>`.
pub trait EntityStore: Send + Sync {
    /// Load the record at `key`.
    ///
    /// Returns `Ok(None)` for a missing key; absence is not an error.
    ///
    /// # Errors
    ///
    /// - `Backend`: the backend failed
    /// - `Serialization`: the stored record could not be decoded
    fn get(&self, key: EntityKey) -> StoreFuture<'_, Option<Versioned<Entity>>>;

    /// List one page of records in canonical key order.
    ///
    /// # Errors
    ///
    /// - `Backend`: the backend failed
    /// - `Serialization`: a stored record could not be decoded
    fn list(&self, query: ListQuery) -> StoreFuture<'_, Page<Versioned<Entity>>>;

    /// Apply a batch atomically.
    ///
    /// Every precondition is checked before anything is written. If one
    /// fails, no mutation is applied.
    ///
    /// # Errors
    ///
    /// - `Conflict`: a precondition did not hold
    /// - `InvalidBatch`: a key appears twice
    /// - `Backend` / `Serialization`: the write failed; nothing was applied
    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()>;

    /// Check the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if it is not.
    fn health_check(&self) -> StoreFuture<'_, ()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Unconditional upsert of a single record.
    ///
    /// # Errors
    ///
    /// As [`EntityStore::commit`].
    fn put(&self, entity: Entity) -> StoreFuture<'_, ()> {
        let mut batch = WriteBatch::new();
        batch.put(entity, Precondition::Any);
        self.commit(batch)
    }

    /// Unconditional delete of a single record.
    ///
    /// # Errors
    ///
    /// As [`EntityStore::commit`].
    fn delete(&self, key: EntityKey) -> StoreFuture<'_, ()> {
        let mut batch = WriteBatch::new();
        batch.delete(key, Precondition::Any);
        self.commit(batch)
    }

    /// Whether a record exists at `key`.
    ///
    /// # Errors
    ///
    /// As [`EntityStore::get`].
    fn exists(&self, key: EntityKey) -> StoreFuture<'_, bool> {
        let loaded = self.get(key);
        Box::pin(async move { Ok(loaded.await?.is_some()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::Campus;
    use crate::key::{CampusKey, LotKey, SpaceId};
    use chrono::Utc;

    fn campus_key() -> EntityKey {
        CampusKey::new("north").unwrap().into()
    }

    #[test]
    fn conflict_error_display() {
        let error = StoreError::Conflict {
            key: campus_key(),
            expected: Some(Version::new(5)),
            actual: Some(Version::new(7)),
        };
        let display = error.to_string();
        assert!(display.contains("campus/north"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found version 7"));

        let error = StoreError::Conflict {
            key: campus_key(),
            expected: None,
            actual: Some(Version::FIRST),
        };
        assert!(error.to_string().contains("expected absent"));
    }

    #[test]
    fn preconditions() {
        let key = campus_key();
        assert!(Precondition::Any.check(&key, Some(Version::new(3))).is_ok());
        assert!(Precondition::Absent.check(&key, None).is_ok());
        assert!(Precondition::Absent.check(&key, Some(Version::FIRST)).is_err());
        assert!(
            Precondition::AtVersion(Version::new(2))
                .check(&key, Some(Version::new(2)))
                .is_ok()
        );
        assert!(Precondition::AtVersion(Version::new(2)).check(&key, None).is_err());
        assert_eq!(Precondition::from_read(None), Precondition::Absent);
    }

    #[test]
    fn batches_reject_repeated_keys() {
        let campus = Campus::new(CampusKey::new("north").unwrap(), Utc::now());
        let mut batch = WriteBatch::new();
        batch.put(campus.clone().into(), Precondition::Any);
        assert!(batch.ensure_unique_keys().is_ok());

        batch.delete(campus_key(), Precondition::Any);
        assert!(matches!(
            batch.ensure_unique_keys(),
            Err(StoreError::InvalidBatch(_))
        ));
    }

    #[test]
    fn list_query_matching() {
        let lot = LotKey::new("north", "A").unwrap();
        let space: EntityKey = lot.space(SpaceId::FIRST).into();
        let other: EntityKey = LotKey::new("south", "A").unwrap().space(SpaceId::FIRST).into();

        let query = ListQuery::new(EntityKind::Space, 10).under(campus_key());
        assert!(query.matches(&space));
        assert!(!query.matches(&other));
        assert!(!query.matches(&lot.into()));
        assert_eq!(ListQuery::new(EntityKind::Lot, 0).effective_limit(), 1);
        assert_eq!(ListQuery::new(EntityKind::Lot, 10_000).effective_limit(), MAX_PAGE_SIZE);
    }
}

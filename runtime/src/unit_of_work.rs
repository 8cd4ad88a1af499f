//! Read-modify-write over an [`EntityStore`].
//!
//! A [`UnitOfWork`] remembers the version of every record it loads and stages
//! writes in memory. On commit each staged write carries a precondition:
//!
//! - a key that was loaded must still be at the version that was read (or
//!   still be absent)
//! - a key that was never loaded must be absent for a put; deletes of
//!   unloaded keys are unconditional
//!
//! so a concurrent writer touching any of the same records turns the whole
//! commit into a [`StoreError::Conflict`] and nothing is written.

use crate::metrics::InventoryMetrics;
use parkgrid_core::entity::{Campus, Entity, Lot, Space};
use parkgrid_core::error::{InventoryError, Result};
use parkgrid_core::key::{CampusKey, EntityKey, EntityKind, LotKey, SpaceKey};
use parkgrid_core::store::{
    EntityStore, ListQuery, MAX_PAGE_SIZE, Precondition, StoreError, Version, WriteBatch,
};
use std::collections::{BTreeMap, HashMap};

enum Staged {
    Put(Entity),
    Delete(EntityKey),
}

/// Tracks reads and staged writes for one attempt of an operation.
pub struct UnitOfWork<'a> {
    store: &'a dyn EntityStore,
    reads: HashMap<String, Option<Version>>,
    staged: BTreeMap<String, Staged>,
}

impl<'a> UnitOfWork<'a> {
    /// Start an empty unit of work.
    #[must_use]
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            staged: BTreeMap::new(),
        }
    }

    /// Load a record, remembering its version (or its absence).
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn load(&mut self, key: EntityKey) -> Result<Option<Entity>> {
        let record = self.store.get(key.clone()).await?;
        self.reads
            .insert(key.to_string(), record.as_ref().map(|r| r.version));
        Ok(record.map(|r| r.value))
    }

    /// Load a campus that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if it does not.
    pub async fn campus(&mut self, key: &CampusKey) -> Result<Campus> {
        let entity = self.require(key.clone().into()).await?;
        entity.into_campus().ok_or_else(|| wrong_kind(key, EntityKind::Campus))
    }

    /// Load a lot that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if it does not.
    pub async fn lot(&mut self, key: &LotKey) -> Result<Lot> {
        let entity = self.require(key.clone().into()).await?;
        entity.into_lot().ok_or_else(|| wrong_kind(key, EntityKind::Lot))
    }

    /// Load a space that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::NotFound`] if it does not.
    pub async fn space(&mut self, key: &SpaceKey) -> Result<Space> {
        let entity = self.require(key.clone().into()).await?;
        entity.into_space().ok_or_else(|| wrong_kind(key, EntityKind::Space))
    }

    /// Fail with `AlreadyExists` unless `key` is free.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::AlreadyExists`] if a record is stored there.
    pub async fn ensure_absent(&mut self, key: EntityKey) -> Result<()> {
        match self.load(key.clone()).await? {
            Some(_) => Err(InventoryError::AlreadyExists(key)),
            None => Ok(()),
        }
    }

    /// Load every record of `kind` under `parent`, across all pages.
    ///
    /// # Errors
    ///
    /// Returns the store's error if a read fails.
    pub async fn descendants(&mut self, kind: EntityKind, parent: EntityKey) -> Result<Vec<Entity>> {
        let mut found = Vec::new();
        let mut token = None;
        loop {
            let query = ListQuery::new(kind, MAX_PAGE_SIZE)
                .under(parent.clone())
                .after(token);
            let page = self.store.list(query).await?;
            for record in page.items {
                self.reads
                    .insert(record.value.key().to_string(), Some(record.version));
                found.push(record.value);
            }
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(found),
            }
        }
    }

    /// Stage a write of `entity` under its own key.
    pub fn put(&mut self, entity: impl Into<Entity>) {
        let entity = entity.into();
        self.staged
            .insert(entity.key().to_string(), Staged::Put(entity));
    }

    /// Stage removal of `key`.
    pub fn delete(&mut self, key: impl Into<EntityKey>) {
        let key = key.into();
        self.staged.insert(key.to_string(), Staged::Delete(key));
    }

    /// Number of staged writes.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// The batch this unit of work would commit.
    #[must_use]
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (canonical, staged) in self.staged {
            let read = self.reads.get(&canonical).copied();
            match staged {
                Staged::Put(entity) => {
                    let precondition = read.map_or(Precondition::Absent, Precondition::from_read);
                    batch.put(entity, precondition);
                }
                Staged::Delete(key) => {
                    let precondition = read.map_or(Precondition::Any, Precondition::from_read);
                    batch.delete(key, precondition);
                }
            }
        }
        batch
    }

    /// Commit every staged write atomically.
    ///
    /// Nothing is sent to the store when nothing was staged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] (wrapped) if any record changed since
    /// it was read, or the store's error if the write fails.
    pub async fn commit(self) -> Result<()> {
        let store = self.store;
        let batch = self.into_batch();
        if batch.is_empty() {
            return Ok(());
        }
        let size = batch.len();
        store.commit(batch).await?;
        InventoryMetrics::record_commit();
        tracing::debug!(mutations = size, backend = store.backend_name(), "Committed batch");
        Ok(())
    }

    async fn require(&mut self, key: EntityKey) -> Result<Entity> {
        self.load(key.clone())
            .await?
            .ok_or(InventoryError::NotFound(key))
    }
}

fn wrong_kind(key: &impl std::fmt::Display, expected: EntityKind) -> InventoryError {
    InventoryError::Store(StoreError::Serialization(format!(
        "record at {key} is not a {expected}"
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parkgrid_core::environment::Clock;
    use parkgrid_core::store::Mutation;
    use parkgrid_testing::{InMemoryEntityStore, test_clock};

    fn campus_key() -> CampusKey {
        CampusKey::new("north").unwrap()
    }

    #[tokio::test]
    async fn preconditions_follow_reads() {
        let store = InMemoryEntityStore::new();
        store
            .put(Campus::new(campus_key(), test_clock().now()).into())
            .await
            .unwrap();

        let mut uow = UnitOfWork::new(&store);
        let campus = uow.campus(&campus_key()).await.unwrap();
        let lot_key = campus_key().lot("A").unwrap();
        uow.ensure_absent(lot_key.clone().into()).await.unwrap();
        uow.put(campus);
        uow.delete(campus_key().lot("B").unwrap());

        let batch = uow.into_batch();
        let preconditions: Vec<(String, Precondition)> = batch
            .mutations()
            .iter()
            .map(|m| (m.key().to_string(), m.precondition()))
            .collect();
        assert_eq!(
            preconditions,
            vec![
                ("campus/north".to_string(), Precondition::AtVersion(Version::FIRST)),
                ("campus/north/lot/B".to_string(), Precondition::Any),
            ]
        );
        assert!(matches!(batch.mutations()[0], Mutation::Put { .. }));
    }

    #[tokio::test]
    async fn stale_read_conflicts() {
        let store = InMemoryEntityStore::new();
        store
            .put(Campus::new(campus_key(), test_clock().now()).into())
            .await
            .unwrap();

        let mut uow = UnitOfWork::new(&store);
        let mut campus = uow.campus(&campus_key()).await.unwrap();

        store
            .put(Campus::new(campus_key(), test_clock().now()).into())
            .await
            .unwrap();

        campus.total_lots = 1;
        uow.put(campus);
        let err = uow.commit().await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = InMemoryEntityStore::new();
        let mut uow = UnitOfWork::new(&store);
        let err = uow.campus(&campus_key()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn empty_commit_touches_nothing() {
        let store = InMemoryEntityStore::new();
        UnitOfWork::new(&store).commit().await.unwrap();
        assert_eq!(store.commit_count(), 0);
    }
}

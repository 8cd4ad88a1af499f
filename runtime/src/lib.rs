//! # Parkgrid Runtime
//!
//! The inventory service: campus, lot and space operations over an
//! [`EntityStore`], with counters kept consistent on every write.
//!
//! ## Core Components
//!
//! - **[`Inventory`]**: the public API; one method per operation
//! - **[`unit_of_work::UnitOfWork`]**: version-tracked reads and one atomic
//!   commit per operation attempt
//! - **[`retry`]**: optimistic-concurrency retry with backoff and jitter
//! - **[`metrics`]**: Prometheus counters and histograms
//! - **[`config`]**: environment-driven configuration
//!
//! ## Example
//!
//! ```no_run
//! use parkgrid_runtime::{Inventory, config::InventoryConfig};
//! use parkgrid_core::entity::NewLot;
//! use parkgrid_core::store::EntityStore;
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn EntityStore>) -> parkgrid_core::Result<()> {
//! let inventory = Inventory::new(store, InventoryConfig::from_env());
//!
//! inventory.create_campus("north").await?;
//! let lot = inventory.create_lot("north", NewLot::new("A", "staff")).await?;
//! inventory.create_spaces(&lot.key, 3).await?;
//!
//! let view = inventory.lot_view(&lot.key).await?;
//! assert_eq!(view.lot.total_spaces, 3);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use parkgrid_core::analytics::{CampusView, LotView, SpaceView};
use parkgrid_core::entity::{Campus, Entity, Lot, LotPatch, NewLot, Space, SpacePatch};
use parkgrid_core::environment::{Clock, SystemClock};
use parkgrid_core::error::{InventoryError, Result};
use parkgrid_core::event_log::EventKind;
use parkgrid_core::key::{CampusKey, EntityKey, EntityKind, LotKey, SpaceId, SpaceKey};
use parkgrid_core::propagation::{self, SpaceSlot};
use parkgrid_core::store::{EntityStore, ListQuery, Page, PageToken};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Environment-driven configuration
pub mod config;

/// Health reporting
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Counter verification and repair
pub mod reconcile;

/// Retry logic with exponential backoff
pub mod retry;

/// Version-tracked read-modify-write
pub mod unit_of_work;

use config::InventoryConfig;
use metrics::InventoryMetrics;
use retry::retry_on_conflict;
use unit_of_work::UnitOfWork;

pub use health::{HealthStatus, StoreHealth};
pub use reconcile::{Correction, ReconcileMode, ReconcileReport};

/// Largest number of spaces a single `create_spaces`/`append_spaces` call
/// may write.
pub const MAX_SPACES_PER_CALL: u32 = 10_000;

/// The parking inventory.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct Inventory {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    config: InventoryConfig,
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Inventory {
    /// Create an inventory over `store` using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: InventoryConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the clock used for creation timestamps and log seeds.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Probe the storage backend.
    pub async fn health(&self) -> StoreHealth {
        StoreHealth::probe(self.store.as_ref()).await
    }

    // ------------------------------------------------------------------
    // Campuses
    // ------------------------------------------------------------------

    /// Create an empty campus.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidKey`] for an empty name
    /// - [`InventoryError::AlreadyExists`] if the campus exists
    #[tracing::instrument(skip(self))]
    pub async fn create_campus(&self, name: &str) -> Result<Campus> {
        let key = CampusKey::new(name)?;
        let campus = self
            .run("create_campus", || self.create_campus_once(&key))
            .await?;
        InventoryMetrics::record_created(EntityKind::Campus, 1);
        tracing::info!(campus = %campus.key, "Campus created");
        Ok(campus)
    }

    async fn create_campus_once(&self, key: &CampusKey) -> Result<Campus> {
        let mut uow = self.unit_of_work();
        uow.ensure_absent(key.clone().into()).await?;
        let campus = Campus::new(key.clone(), self.clock.now());
        uow.put(campus.clone());
        uow.commit().await?;
        Ok(campus)
    }

    /// Load a campus.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    pub async fn get_campus(&self, name: &str) -> Result<Campus> {
        let key = CampusKey::new(name)?;
        self.fetch(key.into(), Entity::into_campus).await
    }

    /// One page of campuses in key order.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn list_campuses(&self, page_token: Option<PageToken>) -> Result<Page<Campus>> {
        self.page(EntityKind::Campus, None, page_token, Entity::into_campus)
            .await
    }

    /// A campus with its occupancy percentage.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    pub async fn campus_view(&self, name: &str) -> Result<CampusView> {
        let campus = self.get_campus(name).await?;
        Ok(CampusView::new(campus, self.config.occupancy_policy))
    }

    /// Move a campus and everything under it to a new name.
    ///
    /// Counters, logs and creation times are carried over; the old keys are
    /// removed in the same commit.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if `old` does not exist
    /// - [`InventoryError::AlreadyExists`] if `new` does (including `old == new`)
    #[tracing::instrument(skip(self))]
    pub async fn rename_campus(&self, old: &str, new: &str) -> Result<Campus> {
        let from = CampusKey::new(old)?;
        let to = CampusKey::new(new)?;
        let campus = self
            .run("rename_campus", || self.rename_campus_once(&from, &to))
            .await?;
        tracing::info!(from = %from, to = %to, "Campus renamed");
        Ok(campus)
    }

    async fn rename_campus_once(&self, from: &CampusKey, to: &CampusKey) -> Result<Campus> {
        let mut uow = self.unit_of_work();
        let mut campus = uow.campus(from).await?;
        uow.ensure_absent(to.clone().into()).await?;

        let lots = uow
            .descendants(EntityKind::Lot, from.clone().into())
            .await?;
        let spaces = uow
            .descendants(EntityKind::Space, from.clone().into())
            .await?;

        for entity in lots.into_iter().chain(spaces) {
            uow.delete(entity.key());
            match entity {
                Entity::Lot(mut lot) => {
                    lot.key = lot.key.with_campus(to);
                    uow.put(lot);
                }
                Entity::Space(mut space) => {
                    space.key = space.key.with_campus(to);
                    uow.put(space);
                }
                Entity::Campus(_) => {}
            }
        }

        uow.delete(from.clone());
        campus.key = to.clone();
        uow.put(campus.clone());
        uow.commit().await?;
        Ok(campus)
    }

    /// Delete a campus together with all its lots and spaces.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn delete_campus(&self, name: &str) -> Result<()> {
        let key = CampusKey::new(name)?;
        let removed = self
            .run("delete_campus", || self.delete_campus_once(&key))
            .await?;
        tracing::info!(campus = %key, removed, "Campus deleted");
        Ok(())
    }

    async fn delete_campus_once(&self, key: &CampusKey) -> Result<usize> {
        let mut uow = self.unit_of_work();
        uow.campus(key).await?;
        let children = [EntityKind::Lot, EntityKind::Space];
        for kind in children {
            for entity in uow.descendants(kind, key.clone().into()).await? {
                uow.delete(entity.key());
            }
        }
        uow.delete(key.clone());
        let removed = uow.staged_len();
        uow.commit().await?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Lots
    // ------------------------------------------------------------------

    /// Create a lot in an existing campus.
    ///
    /// `current_permissions` starts equal to `default_permissions` and the
    /// campus `total_lots` grows by one in the same commit.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if the campus does not exist
    /// - [`InventoryError::AlreadyExists`] if the lot exists
    /// - [`InventoryError::InvalidArgument`] if a coordinate is not finite
    #[tracing::instrument(skip(self, draft), fields(lot = %draft.name))]
    pub async fn create_lot(&self, campus: &str, draft: NewLot) -> Result<Lot> {
        let key = CampusKey::new(campus)?.lot(draft.name.clone())?;
        draft.validate()?;
        let lot = self
            .run("create_lot", || self.create_lot_once(&key, &draft))
            .await?;
        InventoryMetrics::record_created(EntityKind::Lot, 1);
        tracing::info!(lot = %lot.key, "Lot created");
        Ok(lot)
    }

    async fn create_lot_once(&self, key: &LotKey, draft: &NewLot) -> Result<Lot> {
        let mut uow = self.unit_of_work();
        let mut campus = uow.campus(&key.campus_key()).await?;
        uow.ensure_absent(key.clone().into()).await?;

        let lot = Lot::new(key.clone(), draft.clone(), self.clock.now());
        propagation::register_lot(&mut campus);

        uow.put(lot.clone());
        uow.put(campus);
        uow.commit().await?;
        Ok(lot)
    }

    /// Load a lot.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    pub async fn get_lot(&self, key: &LotKey) -> Result<Lot> {
        self.fetch(key.clone().into(), Entity::into_lot).await
    }

    /// One page of lots across every campus.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn list_lots(&self, page_token: Option<PageToken>) -> Result<Page<Lot>> {
        self.page(EntityKind::Lot, None, page_token, Entity::into_lot)
            .await
    }

    /// One page of the lots in a campus.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the campus does not exist.
    pub async fn list_lots_in(
        &self,
        campus: &str,
        page_token: Option<PageToken>,
    ) -> Result<Page<Lot>> {
        let campus = self.get_campus(campus).await?;
        self.page(
            EntityKind::Lot,
            Some(campus.key.into()),
            page_token,
            Entity::into_lot,
        )
        .await
    }

    /// Change a lot's permissions or coordinates.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if it does not exist
    /// - [`InventoryError::InvalidArgument`] if a new coordinate is not finite
    #[tracing::instrument(skip(self, key, patch), fields(lot = %key))]
    pub async fn update_lot(&self, key: &LotKey, patch: LotPatch) -> Result<Lot> {
        patch.validate()?;
        self.run("update_lot", || self.update_lot_once(key, &patch))
            .await
    }

    async fn update_lot_once(&self, key: &LotKey, patch: &LotPatch) -> Result<Lot> {
        let mut uow = self.unit_of_work();
        let mut lot = uow.lot(key).await?;
        lot.apply(patch.clone());
        uow.put(lot.clone());
        uow.commit().await?;
        Ok(lot)
    }

    /// A lot with its rounded occupancy and log analytics.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if it does not exist
    /// - [`InventoryError::MalformedLogEntry`] if a displayed log entry is bad
    pub async fn lot_view(&self, key: &LotKey) -> Result<LotView> {
        let lot = self.get_lot(key).await?;
        Ok(LotView::new(lot, self.config.occupancy_policy)?)
    }

    /// Delete a lot and its spaces, removing their counts from the campus.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    #[tracing::instrument(skip(self, key), fields(lot = %key))]
    pub async fn delete_lot(&self, key: &LotKey) -> Result<()> {
        self.run("delete_lot", || self.delete_lot_once(key)).await?;
        tracing::info!(lot = %key, "Lot deleted");
        Ok(())
    }

    async fn delete_lot_once(&self, key: &LotKey) -> Result<()> {
        let mut uow = self.unit_of_work();
        let lot = uow.lot(key).await?;
        let mut campus = uow.campus(&key.campus_key()).await?;

        for space in uow.descendants(EntityKind::Space, key.clone().into()).await? {
            uow.delete(space.key());
        }
        propagation::detach_lot(&mut campus, &lot);

        uow.delete(key.clone());
        uow.put(campus);
        uow.commit().await
    }

    // ------------------------------------------------------------------
    // Spaces
    // ------------------------------------------------------------------

    /// Create spaces numbered `1..=count` in a lot.
    ///
    /// Each space inherits the lot's default permissions. An id that already
    /// exists is replaced by a fresh, unoccupied record without growing the
    /// totals, so calling this twice with the same count leaves the totals
    /// unchanged. A `count` of zero writes nothing. Use
    /// [`Inventory::append_spaces`] to add more spaces.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if the lot does not exist
    /// - [`InventoryError::InvalidArgument`] if `count` exceeds
    ///   [`MAX_SPACES_PER_CALL`]
    #[tracing::instrument(skip(self, lot), fields(lot = %lot))]
    pub async fn create_spaces(&self, lot: &LotKey, count: u32) -> Result<Vec<Space>> {
        check_count(count)?;
        self.run("create_spaces", || self.write_spaces_once(lot, count, Numbering::FromOne))
            .await
    }

    /// Add `count` spaces numbered after the highest id stored in the lot.
    ///
    /// Concurrent calls never reuse an id; each one that returns `Ok` has
    /// added exactly `count` spaces. A `count` of zero writes nothing.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if the lot does not exist
    /// - [`InventoryError::InvalidArgument`] if `count` exceeds
    ///   [`MAX_SPACES_PER_CALL`] or the ids would overflow
    #[tracing::instrument(skip(self, lot), fields(lot = %lot))]
    pub async fn append_spaces(&self, lot: &LotKey, count: u32) -> Result<Vec<Space>> {
        check_count(count)?;
        self.run("append_spaces", || self.write_spaces_once(lot, count, Numbering::AfterHighest))
            .await
    }

    async fn write_spaces_once(
        &self,
        key: &LotKey,
        count: u32,
        numbering: Numbering,
    ) -> Result<Vec<Space>> {
        let mut uow = self.unit_of_work();
        let mut lot = uow.lot(key).await?;
        let mut campus = uow.campus(&key.campus_key()).await?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let first = match numbering {
            Numbering::FromOne => 1,
            Numbering::AfterHighest => {
                let highest = uow
                    .descendants(EntityKind::Space, key.clone().into())
                    .await?
                    .into_iter()
                    .filter_map(Entity::into_space)
                    .map(|space| space.key.id().get())
                    .max()
                    .unwrap_or(0);
                highest
                    .max(lot.total_spaces)
                    .checked_add(1)
                    .ok_or_else(overflow)?
            }
        };
        let now = self.clock.now();

        let mut spaces = Vec::with_capacity(count as usize);
        let mut created = 0;
        let mut replaced = 0;
        for offset in 0..count {
            let id = SpaceId::new(first.checked_add(offset).ok_or_else(overflow)?)?;
            let space_key = key.space(id);
            let previous = uow
                .load(space_key.clone().into())
                .await?
                .and_then(Entity::into_space);

            match propagation::attach_space(&mut lot, &mut campus, previous.as_ref()) {
                SpaceSlot::New => created += 1,
                SpaceSlot::Overwritten { .. } => replaced += 1,
            }

            let space = Space::new(space_key, lot.default_permissions.clone(), now);
            uow.put(space.clone());
            spaces.push(space);
        }

        uow.put(lot);
        uow.put(campus);
        uow.commit().await?;

        InventoryMetrics::record_created(EntityKind::Space, created);
        tracing::info!(created, replaced, "Spaces written");
        Ok(spaces)
    }

    /// Load a space.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if it does not exist.
    pub async fn get_space(&self, key: &SpaceKey) -> Result<Space> {
        self.fetch(key.clone().into(), Entity::into_space).await
    }

    /// One page of spaces across every lot.
    ///
    /// Pages follow canonical key order, which compares space ids as
    /// strings: space `10` comes before space `2`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn list_spaces(&self, page_token: Option<PageToken>) -> Result<Page<Space>> {
        self.page(EntityKind::Space, None, page_token, Entity::into_space)
            .await
    }

    /// One page of the spaces in a lot, in the same key order as
    /// [`Inventory::list_spaces`].
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the lot does not exist.
    pub async fn list_spaces_in(
        &self,
        lot: &LotKey,
        page_token: Option<PageToken>,
    ) -> Result<Page<Space>> {
        let lot = self.get_lot(lot).await?;
        self.page(
            EntityKind::Space,
            Some(lot.key.into()),
            page_token,
            Entity::into_space,
        )
        .await
    }

    /// Change a space's fields.
    ///
    /// Setting `occupied` to a new value moves the lot and campus
    /// `empty_spaces` counters in the same commit.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the space does not exist.
    #[tracing::instrument(skip(self, key, patch), fields(space = %key))]
    pub async fn update_space(&self, key: &SpaceKey, patch: SpacePatch) -> Result<Space> {
        self.run("update_space", || self.update_space_once(key, &patch))
            .await
    }

    async fn update_space_once(&self, key: &SpaceKey, patch: &SpacePatch) -> Result<Space> {
        let mut uow = self.unit_of_work();
        let mut space = uow.space(key).await?;
        patch.apply_fields(&mut space);

        if let Some(occupied) = patch.occupied {
            let mut lot = uow.lot(&key.lot_key()).await?;
            let mut campus = uow.campus(&key.campus_key()).await?;
            if let Some(transition) =
                propagation::set_occupancy(&mut space, occupied, &mut lot, &mut campus)
            {
                tracing::debug!(?transition, "Occupancy changed");
                uow.put(lot);
                uow.put(campus);
            }
        }

        uow.put(space.clone());
        uow.commit().await?;
        Ok(space)
    }

    /// A space with its log analytics.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if it does not exist
    /// - [`InventoryError::MalformedLogEntry`] if a log entry is bad
    pub async fn space_view(&self, key: &SpaceKey) -> Result<SpaceView> {
        let space = self.get_space(key).await?;
        Ok(SpaceView::new(space)?)
    }

    /// Record an occupancy event on a space.
    ///
    /// The entry is appended to both the space and lot logs. `PullIn` and
    /// `PullOut` update occupancy and the empty counters when they change it;
    /// other kinds are only logged.
    ///
    /// # Errors
    ///
    /// [`InventoryError::NotFound`] if the space does not exist.
    #[tracing::instrument(skip(self, key), fields(space = %key))]
    pub async fn record_event(
        &self,
        key: &SpaceKey,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<Space> {
        let space = self
            .run("record_event", || self.record_event_once(key, kind, at))
            .await?;
        InventoryMetrics::record_log_entry();
        Ok(space)
    }

    async fn record_event_once(
        &self,
        key: &SpaceKey,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<Space> {
        let mut uow = self.unit_of_work();
        let mut space = uow.space(key).await?;
        let mut lot = uow.lot(&key.lot_key()).await?;
        let mut campus = uow.campus(&key.campus_key()).await?;

        let transition = propagation::apply_event(&mut space, &mut lot, &mut campus, kind, at);
        tracing::debug!(?transition, indicator = %kind.indicator(), "Event applied");

        uow.put(space.clone());
        uow.put(lot);
        uow.put(campus);
        uow.commit().await?;
        Ok(space)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn unit_of_work(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self.store.as_ref())
    }

    /// Run one operation attempt after another until it stops conflicting.
    async fn run<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = retry_on_conflict(&self.config.retry, operation, attempt).await;
        InventoryMetrics::record_operation(operation, started.elapsed());
        result
    }

    async fn fetch<T>(&self, key: EntityKey, cast: fn(Entity) -> Option<T>) -> Result<T> {
        let record = self
            .store
            .get(key.clone())
            .await?
            .ok_or_else(|| InventoryError::NotFound(key.clone()))?;
        cast(record.value).ok_or(InventoryError::NotFound(key))
    }

    async fn page<T>(
        &self,
        kind: EntityKind,
        parent: Option<EntityKey>,
        page_token: Option<PageToken>,
        cast: fn(Entity) -> Option<T>,
    ) -> Result<Page<T>> {
        let mut query = ListQuery::new(kind, self.config.page_size).after(page_token);
        query.parent = parent;
        let page = self.store.list(query).await?;
        Ok(Page {
            items: page
                .items
                .into_iter()
                .filter_map(|record| cast(record.value))
                .collect(),
            next: page.next,
        })
    }
}

#[derive(Copy, Clone, Debug)]
enum Numbering {
    FromOne,
    AfterHighest,
}

fn check_count(count: u32) -> Result<()> {
    if count > MAX_SPACES_PER_CALL {
        return Err(InventoryError::InvalidArgument(format!(
            "cannot create {count} spaces in one call (limit {MAX_SPACES_PER_CALL})"
        )));
    }
    Ok(())
}

fn overflow() -> InventoryError {
    InventoryError::InvalidArgument("space id would overflow".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parkgrid_core::store::Version;
    use parkgrid_testing::{InMemoryEntityStore, test_clock};

    fn inventory() -> Inventory {
        Inventory::new(Arc::new(InMemoryEntityStore::new()), InventoryConfig::default())
            .with_clock(Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn campus_lifecycle() {
        let inventory = inventory();
        let campus = inventory.create_campus("north").await.unwrap();
        assert_eq!(campus.total_lots, 0);
        assert_eq!(campus.created_at, test_clock().now());

        let err = inventory.create_campus("north").await.unwrap_err();
        assert!(matches!(err, InventoryError::AlreadyExists(_)));

        let err = inventory.create_campus("").await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidKey(_)));

        inventory.delete_campus("north").await.unwrap();
        assert!(inventory.get_campus("north").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn space_count_is_bounded() {
        let inventory = inventory();
        let lot = LotKey::new("north", "A").unwrap();
        let err = inventory
            .create_spaces(&lot, MAX_SPACES_PER_CALL + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidArgument(_)));
    }

    async fn version_of(inventory: &Inventory, key: impl Into<EntityKey>) -> Version {
        inventory
            .store()
            .get(key.into())
            .await
            .unwrap()
            .unwrap()
            .version
    }

    #[tokio::test]
    async fn zero_spaces_is_a_no_op() {
        let inventory = inventory();
        inventory.create_campus("north").await.unwrap();
        let lot = inventory
            .create_lot("north", NewLot::new("A", "staff"))
            .await
            .unwrap();
        let campus = lot.key.campus_key();
        let lot_version = version_of(&inventory, lot.key.clone()).await;
        let campus_version = version_of(&inventory, campus.clone()).await;

        assert!(inventory.create_spaces(&lot.key, 0).await.unwrap().is_empty());
        assert!(inventory.append_spaces(&lot.key, 0).await.unwrap().is_empty());

        assert_eq!(inventory.get_lot(&lot.key).await.unwrap().total_spaces, 0);
        assert_eq!(version_of(&inventory, lot.key.clone()).await, lot_version);
        assert_eq!(version_of(&inventory, campus).await, campus_version);

        let missing = LotKey::new("north", "B").unwrap();
        let err = inventory.create_spaces(&missing, 0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn append_numbers_after_highest_stored_id() {
        let inventory = inventory();
        inventory.create_campus("north").await.unwrap();
        let lot = inventory
            .create_lot("north", NewLot::new("A", "staff"))
            .await
            .unwrap();
        inventory.create_spaces(&lot.key, 3).await.unwrap();

        // Undercount the lot as a drifted record would.
        let mut drifted = inventory.get_lot(&lot.key).await.unwrap();
        drifted.total_spaces = 1;
        inventory.store().put(drifted.into()).await.unwrap();

        let added = inventory.append_spaces(&lot.key, 2).await.unwrap();
        let ids: Vec<u32> = added.iter().map(|s| s.key.id().get()).collect();
        assert_eq!(ids, vec![4, 5]);
        let first = inventory.get_space(&lot.key.space(SpaceId::FIRST)).await.unwrap();
        assert_eq!(first.permissions, "staff");
    }

    #[tokio::test]
    async fn lots_reject_non_finite_coordinates() {
        let inventory = inventory();
        inventory.create_campus("north").await.unwrap();

        let err = inventory
            .create_lot("north", NewLot::new("A", "staff").at(f64::NAN, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidArgument(_)));
        let key = LotKey::new("north", "A").unwrap();
        assert!(inventory.get_lot(&key).await.unwrap_err().is_not_found());
        assert_eq!(inventory.get_campus("north").await.unwrap().total_lots, 0);

        inventory
            .create_lot("north", NewLot::new("A", "staff").at(40.1, -88.2))
            .await
            .unwrap();
        let patch = LotPatch {
            latitude: Some(f64::INFINITY),
            ..LotPatch::default()
        };
        let err = inventory.update_lot(&key, patch).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidArgument(_)));

        let stored = inventory.get_lot(&key).await.unwrap();
        assert!((stored.latitude - 40.1).abs() < f64::EPSILON);
        assert!(inventory.list_lots_in("north", None).await.is_ok());
    }

    #[tokio::test]
    async fn spaces_list_in_key_order() {
        let inventory = inventory();
        inventory.create_campus("north").await.unwrap();
        let lot = inventory
            .create_lot("north", NewLot::new("A", "staff"))
            .await
            .unwrap();
        inventory.create_spaces(&lot.key, 10).await.unwrap();

        let page = inventory.list_spaces_in(&lot.key, None).await.unwrap();
        let ids: Vec<u32> = page.items.iter().map(|s| s.key.id().get()).collect();
        assert_eq!(ids, vec![1, 10, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let health = inventory().health().await;
        assert!(health.status.is_healthy());
        assert_eq!(health.backend, "memory");
        assert!(health.error.is_none());
    }
}

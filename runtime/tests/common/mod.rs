//! Shared fixtures for inventory integration tests.

#![allow(dead_code)] // Not every test binary uses every helper
#![allow(clippy::unwrap_used)]

use parkgrid_core::entity::{Campus, Entity, Lot, Space};
use parkgrid_runtime::Inventory;
use parkgrid_runtime::config::InventoryConfig;
use parkgrid_runtime::retry::RetryPolicy;
use parkgrid_testing::{InMemoryEntityStore, init_test_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;

/// An inventory over a fresh in-memory store, plus a handle on the store.
pub fn inventory() -> (Inventory, InMemoryEntityStore) {
    inventory_with(InventoryConfig::default())
}

/// Same as [`inventory`] with an explicit configuration.
pub fn inventory_with(config: InventoryConfig) -> (Inventory, InMemoryEntityStore) {
    init_test_tracing();
    let store = InMemoryEntityStore::new();
    let inventory = Inventory::new(Arc::new(store.clone()), config)
        .with_clock(Arc::new(test_clock()));
    (inventory, store)
}

/// A retry policy generous enough for heavy contention in tests.
pub fn patient_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(200)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(20))
        .build()
}

/// Every stored record, split by kind.
pub fn records(store: &InMemoryEntityStore) -> (Vec<Campus>, Vec<Lot>, Vec<Space>) {
    let mut campuses = Vec::new();
    let mut lots = Vec::new();
    let mut spaces = Vec::new();
    for record in store.snapshot() {
        match record.value {
            Entity::Campus(c) => campuses.push(c),
            Entity::Lot(l) => lots.push(l),
            Entity::Space(s) => spaces.push(s),
        }
    }
    (campuses, lots, spaces)
}

/// Asserts that every counter equals a direct count of the records below it
/// and that no record is orphaned.
pub fn assert_invariants(store: &InMemoryEntityStore) {
    let (campuses, lots, spaces) = records(store);

    for lot in &lots {
        assert!(
            campuses.iter().any(|c| c.key == lot.key.campus_key()),
            "lot {} has no campus",
            lot.key
        );
        let mine: Vec<&Space> = spaces.iter().filter(|s| s.key.lot_key() == lot.key).collect();
        let empty = mine.iter().filter(|s| !s.occupied).count();
        assert_eq!(lot.total_spaces as usize, mine.len(), "total_spaces of {}", lot.key);
        assert_eq!(lot.empty_spaces as usize, empty, "empty_spaces of {}", lot.key);
        assert!(lot.empty_spaces <= lot.total_spaces);
    }

    for space in &spaces {
        assert!(
            lots.iter().any(|l| l.key == space.key.lot_key()),
            "space {} has no lot",
            space.key
        );
    }

    for campus in &campuses {
        let mine: Vec<&Lot> = lots.iter().filter(|l| l.key.campus_key() == campus.key).collect();
        let total: u32 = mine.iter().map(|l| l.total_spaces).sum();
        let empty: u32 = mine.iter().map(|l| l.empty_spaces).sum();
        assert_eq!(campus.total_lots as usize, mine.len(), "total_lots of {}", campus.key);
        assert_eq!(campus.total_spaces, total, "total_spaces of {}", campus.key);
        assert_eq!(campus.empty_spaces, empty, "empty_spaces of {}", campus.key);
    }
}

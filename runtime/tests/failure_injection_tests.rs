//! Injected store failures: rejected commits write nothing, conflicts are
//! retried, backend errors surface unchanged.

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use common::{assert_invariants, inventory, inventory_with};
use parkgrid_core::entity::{NewLot, SpacePatch};
use parkgrid_core::error::InventoryError;
use parkgrid_core::key::{LotKey, SpaceId};
use parkgrid_core::store::StoreError;
use parkgrid_runtime::config::InventoryConfig;
use parkgrid_runtime::retry::RetryPolicy;
use parkgrid_testing::Fault;

fn lot_a() -> LotKey {
    LotKey::new("north", "A").unwrap()
}

#[tokio::test]
async fn test_backend_failure_leaves_store_untouched() {
    let (inventory, store) = inventory();
    inventory.create_campus("north").await.unwrap();
    inventory
        .create_lot("north", NewLot::new("A", "staff"))
        .await
        .unwrap();
    let before = store.snapshot();

    store.inject(Fault::Backend("disk full".into()), 1);
    let err = inventory.create_spaces(&lot_a(), 5).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::Store(StoreError::Backend(ref message)) if message == "disk full"
    ));
    assert_eq!(store.snapshot(), before);
    assert_invariants(&store);

    // The next attempt goes through.
    inventory.create_spaces(&lot_a(), 5).await.unwrap();
    assert_eq!(inventory.get_lot(&lot_a()).await.unwrap().total_spaces, 5);
    assert_invariants(&store);
}

#[tokio::test]
async fn test_conflicts_are_retried_transparently() {
    let (inventory, store) = inventory();
    inventory.create_campus("north").await.unwrap();
    inventory
        .create_lot("north", NewLot::new("A", "staff"))
        .await
        .unwrap();
    let commits = store.commit_count();

    store.inject(Fault::Conflict, 3);
    let spaces = inventory.create_spaces(&lot_a(), 2).await.unwrap();
    assert_eq!(spaces.len(), 2);
    assert_eq!(store.rejected_count(), 3);
    assert_eq!(store.commit_count(), commits + 1);

    let lot = inventory.get_lot(&lot_a()).await.unwrap();
    assert_eq!(lot.total_spaces, 2);
    assert_invariants(&store);
}

#[tokio::test]
async fn test_conflict_surfaces_without_retries() {
    let (inventory, store) =
        inventory_with(InventoryConfig::default().with_retry(RetryPolicy::no_retry()));
    inventory.create_campus("north").await.unwrap();
    inventory
        .create_lot("north", NewLot::new("A", "staff"))
        .await
        .unwrap();
    inventory.create_spaces(&lot_a(), 2).await.unwrap();
    let before = store.snapshot();

    store.inject(Fault::Conflict, 1);
    let err = inventory
        .update_space(
            &lot_a().space(SpaceId::FIRST),
            SpacePatch {
                occupied: Some(true),
                ..SpacePatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn test_exhausted_retries_report_the_conflict() {
    let retry = RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(std::time::Duration::from_millis(1))
        .build();
    let (inventory, store) = inventory_with(InventoryConfig::default().with_retry(retry));

    store.inject(Fault::Conflict, 3);
    let err = inventory.create_campus("north").await.unwrap_err();
    assert!(err.is_conflict());
    assert!(store.is_empty());
    assert_eq!(store.rejected_count(), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let (inventory, store) = inventory();
    let err = inventory.create_spaces(&lot_a(), 1).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.rejected_count(), 0);
}

//! Concurrent callers against one store.
//!
//! Every operation re-reads and retries on conflict, so the counters must end
//! up equal to what a serial execution would produce.

#![allow(clippy::unwrap_used)] // Tests can unwrap

mod common;

use chrono::Utc;
use common::{assert_invariants, inventory_with, patient_retry, records};
use futures::future::join_all;
use parkgrid_core::entity::NewLot;
use parkgrid_core::event_log::EventKind;
use parkgrid_core::key::{LotKey, SpaceId};
use parkgrid_runtime::config::InventoryConfig;
use std::collections::BTreeSet;

const WRITERS: u32 = 16;

fn config() -> InventoryConfig {
    InventoryConfig::default().with_retry(patient_retry())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_never_lose_spaces() {
    let (inventory, store) = inventory_with(config());
    inventory.create_campus("north").await.unwrap();
    inventory
        .create_lot("north", NewLot::new("A", "staff"))
        .await
        .unwrap();
    let lot = LotKey::new("north", "A").unwrap();

    let handles = (0..WRITERS).map(|_| {
        let inventory = inventory.clone();
        let lot = lot.clone();
        tokio::spawn(async move { inventory.append_spaces(&lot, 1).await })
    });
    for result in join_all(handles).await {
        let spaces = result.unwrap().unwrap();
        assert_eq!(spaces.len(), 1);
    }

    let stored = inventory.get_lot(&lot).await.unwrap();
    assert_eq!(stored.total_spaces, WRITERS);
    assert_eq!(stored.empty_spaces, WRITERS);

    let (_, _, spaces) = records(&store);
    let ids: BTreeSet<u32> = spaces.iter().map(|s| s.key.id().get()).collect();
    assert_eq!(ids, (1..=WRITERS).collect());
    assert_invariants(&store);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lot_creation_counts_every_lot() {
    let (inventory, store) = inventory_with(config());
    inventory.create_campus("north").await.unwrap();

    let mut handles = Vec::new();
    for n in 0..WRITERS {
        let inventory = inventory.clone();
        handles.push(tokio::spawn(async move {
            let lot = inventory
                .create_lot("north", NewLot::new(format!("L{n}"), "staff"))
                .await?;
            inventory.create_spaces(&lot.key, 2).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let campus = inventory.get_campus("north").await.unwrap();
    assert_eq!(campus.total_lots, WRITERS);
    assert_eq!(campus.total_spaces, WRITERS * 2);
    assert_eq!(campus.empty_spaces, WRITERS * 2);
    assert_invariants(&store);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_keep_empty_counters_exact() {
    let (inventory, store) = inventory_with(config());
    inventory.create_campus("north").await.unwrap();
    inventory
        .create_lot("north", NewLot::new("A", "staff"))
        .await
        .unwrap();
    let lot = LotKey::new("north", "A").unwrap();
    inventory.create_spaces(&lot, WRITERS).await.unwrap();

    // Odd spaces pull in and stay; even spaces pull in then out.
    let mut handles = Vec::new();
    for id in 1..=WRITERS {
        let inventory = inventory.clone();
        let key = lot.space(SpaceId::new(id).unwrap());
        handles.push(tokio::spawn(async move {
            inventory.record_event(&key, EventKind::PullIn, Utc::now()).await?;
            if id % 2 == 0 {
                inventory.record_event(&key, EventKind::PullOut, Utc::now()).await?;
            }
            Ok::<_, parkgrid_core::InventoryError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = inventory.get_lot(&lot).await.unwrap();
    assert_eq!(stored.empty_spaces, WRITERS / 2);
    // Sentinel plus one entry per recorded event.
    assert_eq!(stored.log.len() as u32, 1 + WRITERS + WRITERS / 2);
    let campus = inventory.get_campus("north").await.unwrap();
    assert_eq!(campus.empty_spaces, WRITERS / 2);
    assert_invariants(&store);
}

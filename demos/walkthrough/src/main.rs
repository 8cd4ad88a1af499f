//! Parkgrid Walkthrough
//!
//! Creates campus "north" with lot "A" (default permissions "staff") and
//! three spaces, records a car arriving and leaving, prints the views, then
//! verifies the counters and removes the campus again.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p parkgrid-walkthrough
//! ```
//!
//! Against `PostgreSQL`:
//!
//! ```bash
//! PARKGRID_STORE=postgres DATABASE_URL=postgres://localhost/parkgrid \
//!     cargo run -p parkgrid-walkthrough
//! ```
//!
//! Set `PARKGRID_METRICS_ADDR=0.0.0.0:9000` to expose Prometheus metrics.

#![allow(missing_docs)]

use anyhow::Context;
use chrono::{Duration, Utc};
use parkgrid_core::entity::{NewLot, SpacePatch};
use parkgrid_core::event_log::EventKind;
use parkgrid_core::key::SpaceId;
use parkgrid_core::store::EntityStore;
use parkgrid_postgres::PostgresEntityStore;
use parkgrid_runtime::config::{InventoryConfig, StoreBackend};
use parkgrid_runtime::metrics::MetricsServer;
use parkgrid_runtime::{Inventory, ReconcileMode};
use parkgrid_testing::InMemoryEntityStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn open_store(config: &InventoryConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(InMemoryEntityStore::new())),
        StoreBackend::Postgres => {
            let store = PostgresEntityStore::connect(
                &config.postgres.url,
                config.postgres.max_connections,
            )
            .await
            .context("connecting to PostgreSQL")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parkgrid=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load configuration and start metrics if asked to
    let config = InventoryConfig::from_env();
    tracing::info!(backend = ?config.store, policy = %config.occupancy_policy, "Starting walkthrough");

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("starting metrics server")?;
    }

    // 3. Build the inventory
    let store = open_store(&config).await?;
    let inventory = Inventory::new(store, config);
    let health = inventory.health().await;
    tracing::info!(
        status = %health.status,
        backend = %health.backend,
        latency_ms = health.latency.as_millis(),
        "Store health"
    );

    // 4. Campus, lot and spaces
    inventory.create_campus("north").await?;
    let lot = inventory
        .create_lot("north", NewLot::new("A", "staff").at(40.1106, -88.2073))
        .await?;
    let spaces = inventory.create_spaces(&lot.key, 3).await?;
    tracing::info!(created = spaces.len(), "✓ Lot A has its spaces");

    // 5. A car pulls into space 2 and leaves again
    let space = lot.key.space(SpaceId::new(2)?);
    let arrived = Utc::now() - Duration::hours(2);
    inventory
        .record_event(&space, EventKind::PullIn, arrived)
        .await?;
    let view = inventory.campus_view("north").await?;
    tracing::info!(
        total = view.campus.total_spaces,
        empty = view.campus.empty_spaces,
        percentage = view.percentage,
        "Campus occupancy with one car parked"
    );
    inventory
        .record_event(&space, EventKind::PullOut, Utc::now())
        .await?;

    // 6. Sensor metadata
    inventory
        .update_space(
            &lot.key.space(SpaceId::FIRST),
            SpacePatch {
                tower_id: Some("T-07".into()),
                battery: Some(93),
                ..SpacePatch::default()
            },
        )
        .await?;

    // 7. Views
    let lot_view = inventory.lot_view(&lot.key).await?;
    tracing::info!(
        total = lot_view.lot.total_spaces,
        empty = lot_view.lot.empty_spaces,
        percentage = lot_view.percentage,
        events = ?lot_view.projection.display,
        "Lot A"
    );
    let space_view = inventory.space_view(&space).await?;
    tracing::info!(log_length = space_view.log_length, hours = ?space_view.projection.display, "Space 2");

    // 8. Counters must match a recount
    let report = inventory.reconcile("north", ReconcileMode::Verify).await?;
    tracing::info!(
        lots = report.lots_checked,
        spaces = report.spaces_counted,
        "✓ Counters verified"
    );

    // 9. Clean up
    inventory.delete_campus("north").await?;
    tracing::info!("✓ Campus removed");

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        tracing::debug!(bytes = rendered.len(), "Rendered metrics snapshot");
    }

    Ok(())
}

//! `PostgreSQL` storage for the parking inventory.
//!
//! Provides [`PostgresEntityStore`], a durable implementation of
//! [`EntityStore`](parkgrid_core::store::EntityStore) with:
//!
//! - One `entities` table keyed by canonical hierarchical key
//! - Records stored as JSONB with a version column
//! - Atomic, row-locking commits for optimistic concurrency
//! - Connection pooling and embedded migrations
//!
//! # Example
//!
//! ```no_run
//! use parkgrid_postgres::PostgresEntityStore;
//! use parkgrid_runtime::Inventory;
//! use parkgrid_runtime::config::InventoryConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresEntityStore::new("postgres://localhost/parkgrid").await?;
//! store.migrate().await?;
//! let inventory = Inventory::new(Arc::new(store), InventoryConfig::default());
//! inventory.create_campus("north").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod entity_store;

pub use entity_store::PostgresEntityStore;

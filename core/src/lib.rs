//! # Parkgrid Core
//!
//! Core types for a hierarchical parking inventory.
//!
//! A campus contains lots, a lot contains spaces. Campuses and lots carry
//! aggregate counters that are kept consistent with the records beneath them,
//! and lots and spaces carry a raw occupancy event log that is decoded into
//! analytics series on read.
//!
//! ## Modules
//!
//! - [`key`]: typed, hierarchical keys with a canonical string form
//! - [`entity`]: campus, lot and space records
//! - [`event_log`]: the fixed-width occupancy log codec
//! - [`analytics`]: occupancy percentages and log projections
//! - [`propagation`]: pure counter-propagation rules
//! - [`store`]: the `EntityStore` trait with optimistic concurrency
//! - [`error`]: error kinds returned to callers
//! - [`environment`]: injected dependencies (the clock)
//!
//! ## Architecture Principles
//!
//! - Records are plain data; relations exist only through keys
//! - Counter rules are pure functions over loaded records
//! - Storage is behind a trait and written in atomic batches
//! - Every fault is a typed error, never a panic
//!
//! ## Example
//!
//! ```
//! use parkgrid_core::analytics::{project_log, LogProjection};
//! use parkgrid_core::event_log::LogLayout;
//!
//! let log = vec!["I20240101000000".to_string(), "O20240102174505".to_string()];
//! let projection = project_log(&log, LogLayout::Lot).expect("well-formed log");
//! assert_eq!(projection.display, vec!["O2024-01-02-17-45-05"]);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod entity;
pub mod error;
pub mod event_log;
pub mod key;
pub mod propagation;
pub mod store;

pub use error::{InventoryError, Result};

/// Environment traits
///
/// All external dependencies are abstracted behind traits and injected
/// so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use parkgrid_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

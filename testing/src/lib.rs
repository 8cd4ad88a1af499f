//! # Parkgrid Testing
//!
//! Testing utilities and helpers for Parkgrid.
//!
//! This crate provides:
//! - An in-memory [`EntityStore`](parkgrid_core::store::EntityStore) with
//!   fault injection
//! - A fixed clock for deterministic timestamps and log entries
//! - Tracing setup for tests
//! - proptest strategies for names and log entries
//!
//! ## Example
//!
//! ```
//! use parkgrid_testing::{test_clock, InMemoryEntityStore, Fault};
//! use parkgrid_core::environment::Clock;
//!
//! let store = InMemoryEntityStore::new();
//! store.inject(Fault::Backend("disk full".into()), 1);
//! assert!(store.is_empty());
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! ```

use chrono::{DateTime, Utc};
use parkgrid_core::environment::Clock;

/// Clocks for deterministic timestamps and log seeds.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// 2025-01-01T00:00:00Z as a Unix timestamp.
    const NEW_YEAR_2025: i64 = 1_735_689_600;

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and
    /// advance the clock an inventory is reading.
    ///
    /// ```
    /// use parkgrid_testing::test_clock;
    /// use parkgrid_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = test_clock();
    /// let created = clock.now();
    /// clock.advance(Duration::minutes(90));
    /// assert_eq!(clock.now() - created, Duration::minutes(90));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or back, for a negative duration).
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for FixedClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// A clock stopped at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(NEW_YEAR_2025, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber.
    ///
    /// Output goes through the test harness capture. Honours `RUST_LOG`,
    /// defaulting to `warn,parkgrid=debug`. Safe to call from every test.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn,parkgrid=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::NaiveDate;
    use parkgrid_core::event_log::{EventKind, encode};
    use proptest::prelude::*;

    /// Campus or lot names, including characters that need escaping in the
    /// canonical key form.
    pub fn entity_name() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 _%/-]{1,16}"
    }

    /// Event kinds, weighted toward pull-ins and pull-outs.
    pub fn event_kind() -> impl Strategy<Value = EventKind> {
        prop_oneof![
            4 => Just(EventKind::PullIn),
            4 => Just(EventKind::PullOut),
            1 => proptest::char::range('A', 'Z').prop_map(|c| match c {
                'I' => EventKind::PullIn,
                'O' => EventKind::PullOut,
                other => EventKind::Other(other),
            }),
        ]
    }

    /// Well-formed 15-character log entries with real calendar dates.
    pub fn log_entry() -> impl Strategy<Value = String> {
        (
            event_kind(),
            1970i32..=2200,
            1u32..=12,
            1u32..=28,
            0u32..24,
            0u32..60,
            0u32..60,
        )
            .prop_filter_map("valid date", |(kind, y, mo, d, h, mi, s)| {
                let at = NaiveDate::from_ymd_opt(y, mo, d)?.and_hms_opt(h, mi, s)?;
                Some(encode(kind, at))
            })
    }
}

mod store_mocks;

pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, test_clock};
pub use store_mocks::{Fault, InMemoryEntityStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_new_year_and_stays_put() {
        let clock = test_clock();
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn clones_share_advances() {
        let clock = test_clock();
        let handle = clock.clone();
        handle.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), handle.now());
        assert_eq!(clock.now().timestamp(), 1_735_689_630);
    }
}

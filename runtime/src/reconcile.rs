//! Counter verification and repair.
//!
//! Recounts every lot and space under a campus and compares the result with
//! the stored aggregate counters. Normal operation never lets them drift;
//! this exists for records imported or edited outside the inventory.

use crate::Inventory;
use parkgrid_core::entity::{Entity, Lot, Space};
use parkgrid_core::error::{InventoryError, Result};
use parkgrid_core::key::{CampusKey, EntityKey, EntityKind};
use parkgrid_core::propagation::{CounterDrift, Tally};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What `reconcile` does when counters disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Report the first divergence as an error
    Verify,
    /// Rewrite divergent counters from the recount
    Repair,
}

/// One record whose counters were wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Lot or campus key
    pub key: EntityKey,
    /// Each counter that disagreed
    pub drift: Vec<CounterDrift>,
}

/// Outcome of a reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records whose counters were rewritten (empty in verify mode)
    pub corrected: Vec<Correction>,
    /// Lots examined
    pub lots_checked: usize,
    /// Spaces counted
    pub spaces_counted: usize,
}

impl ReconcileReport {
    /// Whether nothing needed correcting.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.corrected.is_empty()
    }
}

fn describe(drift: &[CounterDrift]) -> String {
    drift
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Inventory {
    /// Recount a campus and its lots.
    ///
    /// Spaces are grouped under the lot whose key prefixes theirs; the campus
    /// is checked against the sum over its lots.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::NotFound`] if the campus does not exist
    /// - [`InventoryError::InconsistentCounters`] in [`ReconcileMode::Verify`]
    ///   when any counter disagrees, naming the first such record
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, campus: &str, mode: ReconcileMode) -> Result<ReconcileReport> {
        let key = CampusKey::new(campus)?;
        let report = self
            .run("reconcile", || self.reconcile_once(&key, mode))
            .await?;
        if report.is_consistent() {
            tracing::info!(campus = %key, lots = report.lots_checked, "Counters consistent");
        } else {
            tracing::warn!(
                campus = %key,
                corrected = report.corrected.len(),
                "Counters repaired"
            );
        }
        Ok(report)
    }

    async fn reconcile_once(&self, key: &CampusKey, mode: ReconcileMode) -> Result<ReconcileReport> {
        let mut uow = self.unit_of_work();
        let mut campus = uow.campus(key).await?;

        let lots: Vec<Lot> = uow
            .descendants(EntityKind::Lot, key.clone().into())
            .await?
            .into_iter()
            .filter_map(Entity::into_lot)
            .collect();

        let mut by_lot: BTreeMap<String, Vec<Space>> = BTreeMap::new();
        let mut spaces_counted = 0;
        for space in uow
            .descendants(EntityKind::Space, key.clone().into())
            .await?
            .into_iter()
            .filter_map(Entity::into_space)
        {
            spaces_counted += 1;
            by_lot
                .entry(space.key.lot_key().to_string())
                .or_default()
                .push(space);
        }

        let mut report = ReconcileReport {
            lots_checked: lots.len(),
            spaces_counted,
            ..ReconcileReport::default()
        };
        let mut campus_tally = Tally::default();

        for mut lot in lots {
            let spaces = by_lot.remove(&lot.key.to_string()).unwrap_or_default();
            let tally = Tally::of_spaces(&spaces);
            campus_tally.add_lot(tally);

            let drift = tally.diff_lot(&lot);
            if drift.is_empty() {
                continue;
            }
            let lot_key: EntityKey = lot.key.clone().into();
            if mode == ReconcileMode::Verify {
                return Err(InventoryError::InconsistentCounters {
                    key: lot_key,
                    detail: describe(&drift),
                });
            }
            tally.apply_to_lot(&mut lot);
            uow.put(lot);
            report.corrected.push(Correction { key: lot_key, drift });
        }

        for orphan in by_lot.keys() {
            tracing::warn!(lot = %orphan, "Spaces found under a missing lot; not counted");
        }

        let drift = campus_tally.diff_campus(&campus);
        if !drift.is_empty() {
            let campus_key: EntityKey = key.clone().into();
            if mode == ReconcileMode::Verify {
                return Err(InventoryError::InconsistentCounters {
                    key: campus_key,
                    detail: describe(&drift),
                });
            }
            campus_tally.apply_to_campus(&mut campus);
            uow.put(campus);
            report.corrected.push(Correction {
                key: campus_key,
                drift,
            });
        }

        uow.commit().await?;
        Ok(report)
    }
}

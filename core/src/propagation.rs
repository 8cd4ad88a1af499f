//! Counter propagation rules.
//!
//! Campuses and lots carry aggregate counters over the records beneath them:
//!
//! - `campus.total_lots` is the number of lots under the campus
//! - `lot.total_spaces` / `lot.empty_spaces` count the lot's spaces and the
//!   unoccupied ones
//! - `campus.total_spaces` / `campus.empty_spaces` are the sums over its lots
//!
//! Every function here takes already-loaded records and adjusts them in
//! place. None of them touch storage; the caller commits the changed records
//! together so the counters never drift from the children.
//!
//! Decrements saturate at zero, so an already inconsistent record is never a
//! panic. [`Tally`] recounts from the children and reports any divergence.

use crate::entity::{Campus, Lot, Space};
use crate::event_log::{EventKind, encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What attaching a space did to the slot it landed in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpaceSlot {
    /// The id was unused; totals grew by one.
    New,
    /// A space with this id existed and was replaced by a fresh record.
    Overwritten {
        /// Whether the replaced space was occupied
        was_occupied: bool,
    },
}

/// Direction of an occupancy change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Unoccupied to occupied; one fewer empty space.
    Occupied,
    /// Occupied to unoccupied; one more empty space.
    Vacated,
}

/// Records a new lot in its campus.
pub fn register_lot(campus: &mut Campus) {
    campus.total_lots += 1;
}

/// Accounts for a fresh, unoccupied space written into `lot`.
///
/// `previous` is the record currently stored under the new space's key, if
/// any. Reusing an id leaves the totals alone; if the replaced space was
/// occupied, its slot becomes empty again.
pub fn attach_space(lot: &mut Lot, campus: &mut Campus, previous: Option<&Space>) -> SpaceSlot {
    match previous {
        None => {
            lot.total_spaces += 1;
            lot.empty_spaces += 1;
            campus.total_spaces += 1;
            campus.empty_spaces += 1;
            SpaceSlot::New
        }
        Some(old) => {
            if old.occupied {
                lot.empty_spaces += 1;
                campus.empty_spaces += 1;
            }
            SpaceSlot::Overwritten {
                was_occupied: old.occupied,
            }
        }
    }
}

/// Sets a space's occupancy and moves the empty counters on a real change.
///
/// Returns `None` when `occupied` already matched.
pub fn set_occupancy(
    space: &mut Space,
    occupied: bool,
    lot: &mut Lot,
    campus: &mut Campus,
) -> Option<Transition> {
    if space.occupied == occupied {
        return None;
    }
    space.occupied = occupied;
    if occupied {
        lot.empty_spaces = lot.empty_spaces.saturating_sub(1);
        campus.empty_spaces = campus.empty_spaces.saturating_sub(1);
        Some(Transition::Occupied)
    } else {
        lot.empty_spaces += 1;
        campus.empty_spaces += 1;
        Some(Transition::Vacated)
    }
}

/// Applies an occupancy event to a space and its ancestors.
///
/// The encoded entry is appended to both the space and lot logs. `PullIn`
/// occupies the space and `PullOut` vacates it; other kinds are only logged.
pub fn apply_event(
    space: &mut Space,
    lot: &mut Lot,
    campus: &mut Campus,
    kind: EventKind,
    at: DateTime<Utc>,
) -> Option<Transition> {
    let entry = encode(kind, at.naive_utc());
    space.log.push(entry.clone());
    lot.log.push(entry);
    match kind {
        EventKind::PullIn => set_occupancy(space, true, lot, campus),
        EventKind::PullOut => set_occupancy(space, false, lot, campus),
        EventKind::Other(_) => None,
    }
}

/// Removes a lot and all its spaces from the campus counters.
pub fn detach_lot(campus: &mut Campus, lot: &Lot) {
    campus.total_lots = campus.total_lots.saturating_sub(1);
    campus.total_spaces = campus.total_spaces.saturating_sub(lot.total_spaces);
    campus.empty_spaces = campus.empty_spaces.saturating_sub(lot.empty_spaces);
}

/// Counters recomputed from child records.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Number of lots counted
    pub lots: u32,
    /// Number of spaces counted
    pub spaces: u32,
    /// Number of unoccupied spaces counted
    pub empty: u32,
}

impl Tally {
    /// Counts a lot's spaces.
    #[must_use]
    pub fn of_spaces<'a>(spaces: impl IntoIterator<Item = &'a Space>) -> Self {
        spaces.into_iter().fold(Self::default(), |mut tally, space| {
            tally.spaces += 1;
            if !space.occupied {
                tally.empty += 1;
            }
            tally
        })
    }

    /// Adds a lot's tally to a campus tally.
    pub fn add_lot(&mut self, lot: Self) {
        self.lots += 1;
        self.spaces += lot.spaces;
        self.empty += lot.empty;
    }

    /// Differences between a lot's counters and this tally.
    #[must_use]
    pub fn diff_lot(&self, lot: &Lot) -> Vec<CounterDrift> {
        let mut drift = Vec::new();
        CounterDrift::push_if(&mut drift, Counter::TotalSpaces, lot.total_spaces, self.spaces);
        CounterDrift::push_if(&mut drift, Counter::EmptySpaces, lot.empty_spaces, self.empty);
        drift
    }

    /// Differences between a campus's counters and this tally.
    #[must_use]
    pub fn diff_campus(&self, campus: &Campus) -> Vec<CounterDrift> {
        let mut drift = Vec::new();
        CounterDrift::push_if(&mut drift, Counter::TotalLots, campus.total_lots, self.lots);
        CounterDrift::push_if(&mut drift, Counter::TotalSpaces, campus.total_spaces, self.spaces);
        CounterDrift::push_if(&mut drift, Counter::EmptySpaces, campus.empty_spaces, self.empty);
        drift
    }

    /// Overwrites a lot's counters with this tally.
    pub fn apply_to_lot(&self, lot: &mut Lot) {
        lot.total_spaces = self.spaces;
        lot.empty_spaces = self.empty;
    }

    /// Overwrites a campus's counters with this tally.
    pub fn apply_to_campus(&self, campus: &mut Campus) {
        campus.total_lots = self.lots;
        campus.total_spaces = self.spaces;
        campus.empty_spaces = self.empty;
    }
}

/// A stored aggregate counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// `total_lots`
    TotalLots,
    /// `total_spaces`
    TotalSpaces,
    /// `empty_spaces`
    EmptySpaces,
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TotalLots => "total_lots",
            Self::TotalSpaces => "total_spaces",
            Self::EmptySpaces => "empty_spaces",
        })
    }
}

/// One counter whose stored value disagrees with the recount.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDrift {
    /// Which counter
    pub counter: Counter,
    /// Value on the record
    pub stored: u32,
    /// Value recounted from children
    pub counted: u32,
}

impl CounterDrift {
    fn push_if(drift: &mut Vec<Self>, counter: Counter, stored: u32, counted: u32) {
        if stored != counted {
            drift.push(Self {
                counter,
                stored,
                counted,
            });
        }
    }
}

impl fmt::Display for CounterDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {} but children count {}",
            self.counter, self.stored, self.counted
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::NewLot;
    use crate::key::{LotKey, SpaceId};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 30, 0).unwrap()
    }

    fn fixture() -> (Campus, Lot) {
        let key = LotKey::new("north", "A").unwrap();
        let mut campus = Campus::new(key.campus_key(), at());
        register_lot(&mut campus);
        let lot = Lot::new(key, NewLot::new("A", "staff"), at());
        (campus, lot)
    }

    fn space(lot: &Lot, id: u32) -> Space {
        Space::new(
            lot.key.space(SpaceId::new(id).unwrap()),
            lot.default_permissions.clone(),
            at(),
        )
    }

    fn assert_consistent(campus: &Campus, lot: &Lot, spaces: &[Space]) {
        let tally = Tally::of_spaces(spaces);
        assert!(tally.diff_lot(lot).is_empty(), "{:?}", tally.diff_lot(lot));
        let mut campus_tally = Tally::default();
        campus_tally.add_lot(tally);
        assert!(campus_tally.diff_campus(campus).is_empty());
    }

    mod attach {
        use super::*;

        #[test]
        fn new_spaces_grow_every_counter() {
            let (mut campus, mut lot) = fixture();
            let mut spaces = Vec::new();
            for id in 1..=3 {
                assert_eq!(attach_space(&mut lot, &mut campus, None), SpaceSlot::New);
                spaces.push(space(&lot, id));
            }

            assert_eq!((lot.total_spaces, lot.empty_spaces), (3, 3));
            assert_eq!((campus.total_spaces, campus.empty_spaces), (3, 3));
            assert_consistent(&campus, &lot, &spaces);
        }

        #[test]
        fn overwriting_keeps_totals() {
            let (mut campus, mut lot) = fixture();
            let old = space(&lot, 1);
            attach_space(&mut lot, &mut campus, None);

            let slot = attach_space(&mut lot, &mut campus, Some(&old));
            assert_eq!(slot, SpaceSlot::Overwritten { was_occupied: false });
            assert_eq!((lot.total_spaces, lot.empty_spaces), (1, 1));
        }

        #[test]
        fn overwriting_an_occupied_space_frees_it() {
            let (mut campus, mut lot) = fixture();
            let mut old = space(&lot, 1);
            attach_space(&mut lot, &mut campus, None);
            set_occupancy(&mut old, true, &mut lot, &mut campus);
            assert_eq!(lot.empty_spaces, 0);

            attach_space(&mut lot, &mut campus, Some(&old));
            assert_eq!((lot.total_spaces, lot.empty_spaces), (1, 1));
            assert_eq!(campus.empty_spaces, 1);
            assert_consistent(&campus, &lot, &[space(&lot, 1)]);
        }
    }

    mod events {
        use super::*;

        #[test]
        fn pull_in_then_out() {
            let (mut campus, mut lot) = fixture();
            let mut s = space(&lot, 1);
            attach_space(&mut lot, &mut campus, None);

            let t = apply_event(&mut s, &mut lot, &mut campus, EventKind::PullIn, at());
            assert_eq!(t, Some(Transition::Occupied));
            assert_eq!(lot.empty_spaces, 0);
            assert_eq!(s.log.len(), 2);
            assert_eq!(lot.log.len(), 2);

            let t = apply_event(&mut s, &mut lot, &mut campus, EventKind::PullOut, at());
            assert_eq!(t, Some(Transition::Vacated));
            assert_eq!((lot.empty_spaces, campus.empty_spaces), (1, 1));
        }

        #[test]
        fn repeated_pull_in_only_logs() {
            let (mut campus, mut lot) = fixture();
            let mut s = space(&lot, 1);
            attach_space(&mut lot, &mut campus, None);

            apply_event(&mut s, &mut lot, &mut campus, EventKind::PullIn, at());
            let t = apply_event(&mut s, &mut lot, &mut campus, EventKind::PullIn, at());
            assert_eq!(t, None);
            assert_eq!(lot.empty_spaces, 0);
            assert_eq!(s.log.len(), 3);
        }

        #[test]
        fn other_kinds_only_log() {
            let (mut campus, mut lot) = fixture();
            let mut s = space(&lot, 1);
            attach_space(&mut lot, &mut campus, None);

            let t = apply_event(&mut s, &mut lot, &mut campus, EventKind::Other('M'), at());
            assert_eq!(t, None);
            assert!(!s.occupied);
            assert!(s.log[1].starts_with('M'));
        }
    }

    #[test]
    fn detaching_a_lot_removes_its_counts() {
        let (mut campus, mut lot) = fixture();
        for _ in 0..4 {
            attach_space(&mut lot, &mut campus, None);
        }
        let mut s = space(&lot, 2);
        set_occupancy(&mut s, true, &mut lot, &mut campus);

        detach_lot(&mut campus, &lot);
        assert_eq!(
            (campus.total_lots, campus.total_spaces, campus.empty_spaces),
            (0, 0, 0)
        );
    }

    #[test]
    fn drift_is_reported_and_repaired() {
        let (mut campus, mut lot) = fixture();
        lot.total_spaces = 5;
        campus.empty_spaces = 9;

        let spaces = [space(&lot, 1), space(&lot, 2)];
        let tally = Tally::of_spaces(&spaces);
        let drift = tally.diff_lot(&lot);
        assert_eq!(drift.len(), 2);
        assert_eq!(
            drift[0].to_string(),
            "total_spaces is 5 but children count 2"
        );

        tally.apply_to_lot(&mut lot);
        let mut campus_tally = Tally::default();
        campus_tally.add_lot(tally);
        campus_tally.apply_to_campus(&mut campus);
        assert_consistent(&campus, &lot, &spaces);
    }

    #[derive(Clone, Debug)]
    enum Step {
        Attach(u32),
        Occupy(u32, bool),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1u32..8).prop_map(Step::Attach),
            (1u32..8, any::<bool>()).prop_map(|(id, occupied)| Step::Occupy(id, occupied)),
        ]
    }

    proptest! {
        #[test]
        fn counters_match_children_after_any_sequence(steps in prop::collection::vec(step(), 0..64)) {
            let (mut campus, mut lot) = fixture();
            let mut spaces: std::collections::BTreeMap<u32, Space> = std::collections::BTreeMap::new();

            for step in steps {
                match step {
                    Step::Attach(id) => {
                        attach_space(&mut lot, &mut campus, spaces.get(&id));
                        spaces.insert(id, space(&lot, id));
                    }
                    Step::Occupy(id, occupied) => {
                        if let Some(s) = spaces.get_mut(&id) {
                            set_occupancy(s, occupied, &mut lot, &mut campus);
                        }
                    }
                }
            }

            let stored: Vec<Space> = spaces.into_values().collect();
            let tally = Tally::of_spaces(&stored);
            prop_assert!(tally.diff_lot(&lot).is_empty());
            prop_assert!(lot.empty_spaces <= lot.total_spaces);
            let mut campus_tally = Tally::default();
            campus_tally.add_lot(tally);
            prop_assert!(campus_tally.diff_campus(&campus).is_empty());
        }
    }
}

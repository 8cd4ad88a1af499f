//! Read-side views derived from records and their event logs.
//!
//! Nothing here is stored. Occupancy percentages are computed from the
//! counters on every read, and log projections are built from the raw log
//! without touching it.

use crate::entity::{Campus, Lot, Space};
use crate::event_log::{LogLayout, MalformedLogEntry, decode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a fully occupied lot is reported.
///
/// The historical formula treats "no empty spaces" like "no spaces at all"
/// and reports 0% for a full lot. Consumers that rely on that keep
/// [`OccupancyPolicy::Compatible`]; [`OccupancyPolicy::Corrected`] reports
/// 100%.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyPolicy {
    /// `0` when `total == 0` or `empty == 0`
    #[default]
    Compatible,
    /// `0` only when `total == 0`
    Corrected,
}

impl fmt::Display for OccupancyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compatible => f.write_str("compatible"),
            Self::Corrected => f.write_str("corrected"),
        }
    }
}

impl FromStr for OccupancyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compatible" => Ok(Self::Compatible),
            "corrected" => Ok(Self::Corrected),
            other => Err(format!("unknown occupancy policy '{other}'")),
        }
    }
}

/// Percentage of spaces occupied, unrounded.
///
/// ```
/// use parkgrid_core::analytics::{occupancy_percentage, OccupancyPolicy};
///
/// assert_eq!(occupancy_percentage(10, 10, OccupancyPolicy::Compatible), 0.0);
/// assert_eq!(occupancy_percentage(10, 5, OccupancyPolicy::Compatible), 50.0);
/// assert_eq!(occupancy_percentage(10, 0, OccupancyPolicy::Compatible), 0.0);
/// assert_eq!(occupancy_percentage(10, 0, OccupancyPolicy::Corrected), 100.0);
/// ```
#[must_use]
pub fn occupancy_percentage(total: u32, empty: u32, policy: OccupancyPolicy) -> f64 {
    if total == 0 {
        return 0.0;
    }
    if empty == 0 && policy == OccupancyPolicy::Compatible {
        return 0.0;
    }
    (1.0 - f64::from(empty) / f64::from(total)) * 100.0
}

/// Rounds to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parallel series derived from an event log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogProjection {
    /// Hyphen-joined display strings
    pub display: Vec<String>,
    /// Event indicator characters
    pub indicators: Vec<char>,
    /// `hour + minute / 100` per event, for plotting
    pub hour_minute: Vec<f64>,
}

impl LogProjection {
    /// Number of projected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.display.len()
    }

    /// Whether no events were projected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display.is_empty()
    }
}

/// First log index shown in a view.
///
/// Lot logs start with a creation sentinel that is not displayed; space logs
/// show every entry including the first.
#[must_use]
pub const fn first_displayed_index(layout: LogLayout) -> usize {
    match layout {
        LogLayout::Lot => 1,
        LogLayout::Space => 0,
    }
}

/// Projects a raw log into display, indicator and time-of-day series.
///
/// # Errors
///
/// Returns [`MalformedLogEntry`] (with its log index) for the first entry
/// that fails to decode.
pub fn project_log(
    log: &[String],
    layout: LogLayout,
) -> Result<LogProjection, MalformedLogEntry> {
    let mut projection = LogProjection::default();
    for (index, raw) in log.iter().enumerate().skip(first_displayed_index(layout)) {
        let event = decode(raw).map_err(|e| e.at_index(index))?;
        projection.display.push(event.display(layout));
        projection.indicators.push(event.kind.indicator());
        projection.hour_minute.push(event.hour_minute());
    }
    Ok(projection)
}

/// A campus with its occupancy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampusView {
    /// The campus record
    pub campus: Campus,
    /// Unrounded occupancy percentage
    pub percentage: f64,
}

impl CampusView {
    /// Builds the view.
    #[must_use]
    pub fn new(campus: Campus, policy: OccupancyPolicy) -> Self {
        let percentage = occupancy_percentage(campus.total_spaces, campus.empty_spaces, policy);
        Self { campus, percentage }
    }
}

/// A lot with its occupancy and log analytics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LotView {
    /// The lot record, log untouched
    pub lot: Lot,
    /// Occupancy percentage rounded to two decimals
    pub percentage: f64,
    /// Length of the raw log, sentinel included
    pub log_length: usize,
    /// Derived log series (sentinel skipped)
    pub projection: LogProjection,
}

impl LotView {
    /// Builds the view.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedLogEntry`] if a displayed log entry is malformed.
    pub fn new(lot: Lot, policy: OccupancyPolicy) -> Result<Self, MalformedLogEntry> {
        let percentage = round2(occupancy_percentage(lot.total_spaces, lot.empty_spaces, policy));
        let projection = project_log(&lot.log, LogLayout::Lot)?;
        Ok(Self {
            log_length: lot.log.len(),
            lot,
            percentage,
            projection,
        })
    }
}

/// A space with its log analytics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceView {
    /// The space record, log untouched
    pub space: Space,
    /// Length of the raw log
    pub log_length: usize,
    /// Derived log series (every entry)
    pub projection: LogProjection,
}

impl SpaceView {
    /// Builds the view.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedLogEntry`] if any log entry is malformed.
    pub fn new(space: Space) -> Result<Self, MalformedLogEntry> {
        let projection = project_log(&space.log, LogLayout::Space)?;
        Ok(Self {
            log_length: space.log.len(),
            space,
            projection,
        })
    }
}

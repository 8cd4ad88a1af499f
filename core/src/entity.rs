//! Campus, lot and space records.
//!
//! Records are plain owned data. A child refers to its parent only through
//! its key; no record holds another record. Aggregate counters on campuses
//! and lots are maintained by [`crate::propagation`], never by hand.

use crate::error::{InventoryError, Result};
use crate::event_log::{EventKind, encode};
use crate::key::{CampusKey, EntityKey, EntityKind, LotKey, SpaceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default latitude/longitude of a lot with no coordinates.
pub const DEFAULT_COORDINATE: f64 = 1.0;

/// Tower id of a space with no sensor hardware assigned.
pub const UNASSIGNED_TOWER: &str = "-1";

/// Error status of a healthy space.
pub const NO_ERRORS: &str = "None";

/// A physical site containing lots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campus {
    /// Campus key (the campus name)
    pub key: CampusKey,
    /// Number of lots in this campus
    pub total_lots: u32,
    /// Number of spaces across all lots
    pub total_spaces: u32,
    /// Number of unoccupied spaces across all lots
    pub empty_spaces: u32,
    /// When the campus was created
    pub created_at: DateTime<Utc>,
}

impl Campus {
    /// Creates an empty campus.
    #[must_use]
    pub const fn new(key: CampusKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            total_lots: 0,
            total_spaces: 0,
            empty_spaces: 0,
            created_at,
        }
    }
}

/// A parking lot within a campus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Lot key
    pub key: LotKey,
    /// Permissions new spaces inherit
    pub default_permissions: String,
    /// Permissions currently in force
    pub current_permissions: String,
    /// Number of spaces in this lot
    pub total_spaces: u32,
    /// Number of unoccupied spaces in this lot
    pub empty_spaces: u32,
    /// Latitude of the lot
    pub latitude: f64,
    /// Longitude of the lot
    pub longitude: f64,
    /// Raw occupancy event log; entry 0 is the creation sentinel
    pub log: Vec<String>,
    /// When the lot was created
    pub created_at: DateTime<Utc>,
}

impl Lot {
    /// Creates an empty lot whose log holds the creation sentinel.
    ///
    /// `current_permissions` starts as a copy of `default_permissions`.
    #[must_use]
    pub fn new(key: LotKey, draft: NewLot, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            current_permissions: draft.default_permissions.clone(),
            default_permissions: draft.default_permissions,
            total_spaces: 0,
            empty_spaces: 0,
            latitude: draft.latitude,
            longitude: draft.longitude,
            log: vec![encode(EventKind::PullIn, created_at.naive_utc())],
            created_at,
        }
    }

    /// Applies the non-counter fields of a patch.
    pub fn apply(&mut self, patch: LotPatch) {
        if let Some(default_permissions) = patch.default_permissions {
            self.default_permissions = default_permissions;
        }
        if let Some(current_permissions) = patch.current_permissions {
            self.current_permissions = current_permissions;
        }
        if let Some(latitude) = patch.latitude {
            self.latitude = latitude;
        }
        if let Some(longitude) = patch.longitude {
            self.longitude = longitude;
        }
    }
}

/// A single parking space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    /// Space key
    pub key: SpaceKey,
    /// Identifier of the sensor tower reporting for this space
    pub tower_id: String,
    /// Whether a vehicle is parked here
    pub occupied: bool,
    /// Permissions, inherited from the lot at creation
    pub permissions: String,
    /// Sensor battery level
    pub battery: i32,
    /// Sensor error status
    pub errors: String,
    /// When the space was created
    pub created_at: DateTime<Utc>,
    /// Raw occupancy event log
    pub log: Vec<String>,
}

impl Space {
    /// Creates an unoccupied space whose log holds the creation sentinel.
    #[must_use]
    pub fn new(key: SpaceKey, permissions: String, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            tower_id: UNASSIGNED_TOWER.to_string(),
            occupied: false,
            permissions,
            battery: 0,
            errors: NO_ERRORS.to_string(),
            created_at,
            log: vec![encode(EventKind::PullIn, created_at.naive_utc())],
        }
    }
}

/// Any stored record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    /// A campus record
    Campus(Campus),
    /// A lot record
    Lot(Lot),
    /// A space record
    Space(Space),
}

impl Entity {
    /// Key of the record.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Campus(campus) => campus.key.clone().into(),
            Self::Lot(lot) => lot.key.clone().into(),
            Self::Space(space) => space.key.clone().into(),
        }
    }

    /// Kind of the record.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Campus(_) => EntityKind::Campus,
            Self::Lot(_) => EntityKind::Lot,
            Self::Space(_) => EntityKind::Space,
        }
    }

    /// The campus, if this is one.
    #[must_use]
    pub fn into_campus(self) -> Option<Campus> {
        match self {
            Self::Campus(campus) => Some(campus),
            _ => None,
        }
    }

    /// The lot, if this is one.
    #[must_use]
    pub fn into_lot(self) -> Option<Lot> {
        match self {
            Self::Lot(lot) => Some(lot),
            _ => None,
        }
    }

    /// The space, if this is one.
    #[must_use]
    pub fn into_space(self) -> Option<Space> {
        match self {
            Self::Space(space) => Some(space),
            _ => None,
        }
    }
}

impl From<Campus> for Entity {
    fn from(campus: Campus) -> Self {
        Self::Campus(campus)
    }
}

impl From<Lot> for Entity {
    fn from(lot: Lot) -> Self {
        Self::Lot(lot)
    }
}

impl From<Space> for Entity {
    fn from(space: Space) -> Self {
        Self::Space(space)
    }
}

/// Input for creating a lot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLot {
    /// Lot name, unique within its campus
    pub name: String,
    /// Permissions new spaces inherit
    pub default_permissions: String,
    /// Latitude (defaults to 1.0)
    pub latitude: f64,
    /// Longitude (defaults to 1.0)
    pub longitude: f64,
}

impl NewLot {
    /// A lot draft at the default coordinates.
    #[must_use]
    pub fn new(name: impl Into<String>, default_permissions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_permissions: default_permissions.into(),
            latitude: DEFAULT_COORDINATE,
            longitude: DEFAULT_COORDINATE,
        }
    }

    /// Sets the lot coordinates.
    #[must_use]
    pub const fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    /// Checks that both coordinates are finite.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidArgument`] naming the bad coordinate.
    pub fn validate(&self) -> Result<()> {
        check_coordinate("latitude", self.latitude)?;
        check_coordinate("longitude", self.longitude)
    }
}

/// Partial update of a lot. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LotPatch {
    /// New default permissions
    pub default_permissions: Option<String>,
    /// New current permissions
    pub current_permissions: Option<String>,
    /// New latitude
    pub latitude: Option<f64>,
    /// New longitude
    pub longitude: Option<f64>,
}

impl LotPatch {
    /// Checks that any new coordinate is finite.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidArgument`] naming the bad coordinate.
    pub fn validate(&self) -> Result<()> {
        if let Some(latitude) = self.latitude {
            check_coordinate("latitude", latitude)?;
        }
        if let Some(longitude) = self.longitude {
            check_coordinate("longitude", longitude)?;
        }
        Ok(())
    }
}

// JSON has no NaN or infinity, so a stored lot must only hold finite values.
fn check_coordinate(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(InventoryError::InvalidArgument(format!(
            "{name} must be a finite number, got {value}"
        )))
    }
}

/// Partial update of a space. `None` leaves a field unchanged.
///
/// Changing `occupied` moves the lot and campus `empty_spaces` counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacePatch {
    /// New tower id
    pub tower_id: Option<String>,
    /// New permissions
    pub permissions: Option<String>,
    /// New battery level
    pub battery: Option<i32>,
    /// New error status
    pub errors: Option<String>,
    /// New occupancy state
    pub occupied: Option<bool>,
}

impl SpacePatch {
    /// Applies every field except `occupied`, which needs counter propagation.
    pub fn apply_fields(&self, space: &mut Space) {
        if let Some(tower_id) = &self.tower_id {
            space.tower_id.clone_from(tower_id);
        }
        if let Some(permissions) = &self.permissions {
            space.permissions.clone_from(permissions);
        }
        if let Some(battery) = self.battery {
            space.battery = battery;
        }
        if let Some(errors) = &self.errors {
            space.errors.clone_from(errors);
        }
    }
}

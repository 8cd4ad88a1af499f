//! Hierarchical identity for campuses, lots and spaces.
//!
//! Every record is addressed by the names of its ancestors plus its own id,
//! root first. There are no generated surrogate ids: a campus is its name, a
//! lot is `(campus, lot)`, a space is `(campus, lot, space number)`.
//!
//! # Canonical form
//!
//! Keys have one canonical string form used for persistence and pagination:
//!
//! ```text
//! campus/north
//! campus/north/lot/A
//! campus/north/lot/A/space/3
//! ```
//!
//! `/` and `%` inside names are percent-escaped (`%2F`, `%25`), so a key's
//! string is a prefix of the strings of all its descendants followed by `/`.
//!
//! # Example
//!
//! ```
//! use parkgrid_core::key::{EntityKey, EntityKind};
//!
//! let key = EntityKey::from_path(&[
//!     (EntityKind::Campus, "north"),
//!     (EntityKind::Lot, "A"),
//!     (EntityKind::Space, "3"),
//! ]).unwrap();
//!
//! assert_eq!(key.to_string(), "campus/north/lot/A/space/3");
//! assert_eq!(key.parent().unwrap().to_string(), "campus/north/lot/A");
//! ```

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a key or key segment cannot be built or parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid key: {0}")]
pub struct InvalidKey(String);

impl InvalidKey {
    /// Create an error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The reason the key was rejected.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Root-to-leaf `(kind, id)` pairs of a key.
pub type KeyPath = SmallVec<[(EntityKind, String); 3]>;

/// The three levels of the hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Top-level site
    Campus,
    /// Parking lot within a campus
    Lot,
    /// Single parking space within a lot
    Space,
}

impl EntityKind {
    /// Stable lowercase name used in canonical keys and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Campus => "campus",
            Self::Lot => "lot",
            Self::Space => "space",
        }
    }

    /// Depth in the hierarchy (campus = 1).
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Campus => 1,
            Self::Lot => 2,
            Self::Space => 3,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campus" => Ok(Self::Campus),
            "lot" => Ok(Self::Lot),
            "space" => Ok(Self::Space),
            other => Err(InvalidKey::new(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// Number of a space within its lot. Always a positive integer.
///
/// The textual form is the plain decimal number. Parsing is strict so that
/// every id has exactly one string form: no sign, no leading zeros, no zero.
///
/// ```
/// use parkgrid_core::key::SpaceId;
///
/// let id: SpaceId = "12".parse().unwrap();
/// assert_eq!(id.get(), 12);
/// assert!("0".parse::<SpaceId>().is_err());
/// assert!("07".parse::<SpaceId>().is_err());
/// assert!("x1".parse::<SpaceId>().is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpaceId(NonZeroU32);

impl SpaceId {
    /// The first id assigned in a lot.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Create a space id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] when `value` is zero.
    pub fn new(value: u32) -> Result<Self, InvalidKey> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or_else(|| InvalidKey::new("space id must be a positive integer"))
    }

    /// The numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpaceId {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidKey::new(format!(
                "space id '{s}' is not a positive integer"
            )));
        }
        if s.starts_with('0') {
            return Err(InvalidKey::new(format!(
                "space id '{s}' must be positive without leading zeros"
            )));
        }
        let value: u32 = s
            .parse()
            .map_err(|_| InvalidKey::new(format!("space id '{s}' is out of range")))?;
        Self::new(value)
    }
}

fn validate_name(kind: EntityKind, name: &str) -> Result<(), InvalidKey> {
    if name.is_empty() {
        return Err(InvalidKey::new(format!("{kind} name cannot be empty")));
    }
    Ok(())
}

/// Key of a campus.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampusKey {
    campus: String,
}

impl CampusKey {
    /// Create a campus key.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if the name is empty.
    pub fn new(campus: impl Into<String>) -> Result<Self, InvalidKey> {
        let campus = campus.into();
        validate_name(EntityKind::Campus, &campus)?;
        Ok(Self { campus })
    }

    /// The campus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.campus
    }

    /// Key of a lot under this campus.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if the lot name is empty.
    pub fn lot(&self, lot: impl Into<String>) -> Result<LotKey, InvalidKey> {
        let lot = lot.into();
        validate_name(EntityKind::Lot, &lot)?;
        Ok(LotKey {
            campus: self.campus.clone(),
            lot,
        })
    }
}

/// Key of a lot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LotKey {
    campus: String,
    lot: String,
}

impl LotKey {
    /// Create a lot key from its campus and lot names.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if either name is empty.
    pub fn new(campus: impl Into<String>, lot: impl Into<String>) -> Result<Self, InvalidKey> {
        CampusKey::new(campus)?.lot(lot)
    }

    /// The lot name (unique within its campus).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.lot
    }

    /// The owning campus name.
    #[must_use]
    pub fn campus_name(&self) -> &str {
        &self.campus
    }

    /// Key of the owning campus.
    #[must_use]
    pub fn campus_key(&self) -> CampusKey {
        CampusKey {
            campus: self.campus.clone(),
        }
    }

    /// Key of a space in this lot.
    #[must_use]
    pub fn space(&self, space: SpaceId) -> SpaceKey {
        SpaceKey {
            campus: self.campus.clone(),
            lot: self.lot.clone(),
            space,
        }
    }

    /// The same lot name under another campus.
    #[must_use]
    pub fn with_campus(&self, campus: &CampusKey) -> Self {
        Self {
            campus: campus.campus.clone(),
            lot: self.lot.clone(),
        }
    }
}

/// Key of a space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceKey {
    campus: String,
    lot: String,
    space: SpaceId,
}

impl SpaceKey {
    /// Create a space key.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if a name is empty.
    pub fn new(
        campus: impl Into<String>,
        lot: impl Into<String>,
        space: SpaceId,
    ) -> Result<Self, InvalidKey> {
        Ok(LotKey::new(campus, lot)?.space(space))
    }

    /// The space number.
    #[must_use]
    pub const fn id(&self) -> SpaceId {
        self.space
    }

    /// Key of the owning lot.
    #[must_use]
    pub fn lot_key(&self) -> LotKey {
        LotKey {
            campus: self.campus.clone(),
            lot: self.lot.clone(),
        }
    }

    /// Key of the owning campus.
    #[must_use]
    pub fn campus_key(&self) -> CampusKey {
        CampusKey {
            campus: self.campus.clone(),
        }
    }

    /// The same space under another campus (lot name unchanged).
    #[must_use]
    pub fn with_campus(&self, campus: &CampusKey) -> Self {
        Self {
            campus: campus.campus.clone(),
            lot: self.lot.clone(),
            space: self.space,
        }
    }
}

/// Key of any record in the hierarchy.
///
/// Equality is structural: two keys are equal when every segment is equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntityKey {
    /// A campus
    Campus(CampusKey),
    /// A lot
    Lot(LotKey),
    /// A space
    Space(SpaceKey),
}

impl EntityKey {
    /// Build a key from root-to-leaf `(kind, id)` pairs.
    ///
    /// Accepted shapes are `[campus]`, `[campus, lot]` and
    /// `[campus, lot, space]`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if the shape is wrong, a name is empty, or the
    /// space id is not a positive integer.
    pub fn from_path<S: AsRef<str>>(path: &[(EntityKind, S)]) -> Result<Self, InvalidKey> {
        let kinds: SmallVec<[EntityKind; 3]> = path.iter().map(|(kind, _)| *kind).collect();
        match (kinds.as_slice(), path) {
            ([EntityKind::Campus], [(_, campus)]) => {
                CampusKey::new(campus.as_ref()).map(Self::Campus)
            }
            ([EntityKind::Campus, EntityKind::Lot], [(_, campus), (_, lot)]) => {
                LotKey::new(campus.as_ref(), lot.as_ref()).map(Self::Lot)
            }
            (
                [EntityKind::Campus, EntityKind::Lot, EntityKind::Space],
                [(_, campus), (_, lot), (_, space)],
            ) => {
                let space: SpaceId = space.as_ref().parse()?;
                SpaceKey::new(campus.as_ref(), lot.as_ref(), space).map(Self::Space)
            }
            _ => Err(InvalidKey::new(format!(
                "key path must be campus[/lot[/space]], got [{}]",
                kinds
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Kind of the record this key addresses.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Campus(_) => EntityKind::Campus,
            Self::Lot(_) => EntityKind::Lot,
            Self::Space(_) => EntityKind::Space,
        }
    }

    /// Root-to-leaf `(kind, id)` pairs. Inverse of [`EntityKey::from_path`].
    #[must_use]
    pub fn path(&self) -> KeyPath {
        match self {
            Self::Campus(key) => smallvec![(EntityKind::Campus, key.campus.clone())],
            Self::Lot(key) => smallvec![
                (EntityKind::Campus, key.campus.clone()),
                (EntityKind::Lot, key.lot.clone()),
            ],
            Self::Space(key) => smallvec![
                (EntityKind::Campus, key.campus.clone()),
                (EntityKind::Lot, key.lot.clone()),
                (EntityKind::Space, key.space.to_string()),
            ],
        }
    }

    /// Immediate parent, or `None` for a campus.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Campus(_) => None,
            Self::Lot(key) => Some(Self::Campus(key.campus_key())),
            Self::Space(key) => Some(Self::Lot(key.lot_key())),
        }
    }

    /// Ancestor chain, root first. Empty for a campus.
    #[must_use]
    pub fn ancestors(&self) -> SmallVec<[Self; 2]> {
        let mut chain: SmallVec<[Self; 2]> = SmallVec::new();
        let mut current = self.parent();
        while let Some(key) = current {
            current = key.parent();
            chain.insert(0, key);
        }
        chain
    }

    /// Whether `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.ancestors().iter().any(|ancestor| ancestor == self)
    }

    /// Campus at the root of this key.
    #[must_use]
    pub fn campus_key(&self) -> CampusKey {
        match self {
            Self::Campus(key) => key.clone(),
            Self::Lot(key) => key.campus_key(),
            Self::Space(key) => key.campus_key(),
        }
    }
}

impl From<CampusKey> for EntityKey {
    fn from(key: CampusKey) -> Self {
        Self::Campus(key)
    }
}

impl From<LotKey> for EntityKey {
    fn from(key: LotKey) -> Self {
        Self::Lot(key)
    }
}

impl From<SpaceKey> for EntityKey {
    fn from(key: SpaceKey) -> Self {
        Self::Space(key)
    }
}

fn escape_segment(id: &str, out: &mut String) {
    for ch in id.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
}

fn unescape_segment(raw: &str) -> Result<String, InvalidKey> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3);
        match escape {
            Some("%25") => out.push('%'),
            Some("%2F") => out.push('/'),
            _ => {
                return Err(InvalidKey::new(format!(
                    "bad escape sequence in key segment '{raw}'"
                )));
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (index, (kind, id)) in self.path().iter().enumerate() {
            if index > 0 {
                out.push('/');
            }
            out.push_str(kind.as_str());
            out.push('/');
            escape_segment(id, &mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for EntityKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() % 2 != 0 || parts.is_empty() {
            return Err(InvalidKey::new(format!("malformed key '{s}'")));
        }
        let mut path: SmallVec<[(EntityKind, String); 3]> = SmallVec::new();
        for pair in parts.chunks(2) {
            let kind: EntityKind = pair[0].parse()?;
            path.push((kind, unescape_segment(pair[1])?));
        }
        Self::from_path(&path)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for EntityKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for CampusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EntityKey::Campus(self.clone()).fmt(f)
    }
}

impl fmt::Display for LotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EntityKey::Lot(self.clone()).fmt(f)
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EntityKey::Space(self.clone()).fmt(f)
    }
}

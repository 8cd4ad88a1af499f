//! Fixed-width occupancy event log codec.
//!
//! Spaces and lots keep their occupancy history as a list of short strings.
//! Each entry is a one-letter event indicator followed by a 14-digit
//! timestamp:
//!
//! ```text
//! I 2018 01 02 03 04 05
//! │ │    │  │  │  │  └─ [13..] rest (seconds and any trailing digits)
//! │ │    │  │  │  └──── [11..13] minute
//! │ │    │  │  └─────── [9..11]  hour
//! │ │    │  └────────── [7..9]   day
//! │ │    └───────────── [5..7]   month
//! │ └────────────────── [1..5]   year
//! └──────────────────── [0]      indicator ('I' pull-in, 'O' pull-out)
//! ```
//!
//! Decoding is pure and stateless. Entries are never rewritten in storage;
//! display strings are derived on read.
//!
//! # Example
//!
//! ```
//! use parkgrid_core::event_log::{decode, EventKind, LogLayout};
//!
//! let event = decode("I20180102030405").unwrap();
//! assert_eq!(event.kind, EventKind::PullIn);
//! assert_eq!(event.display(LogLayout::Lot), "I2018-01-02-03-04-05");
//! assert_eq!(event.display(LogLayout::Space), "2018-01-02-03");
//! assert_eq!(event.encode(), "I20180102030405");
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Shortest well-formed entry: indicator plus 14 timestamp digits.
pub const MIN_ENTRY_LEN: usize = 15;

const YEAR: Range<usize> = 1..5;
const MONTH: Range<usize> = 5..7;
const DAY: Range<usize> = 7..9;
const HOUR: Range<usize> = 9..11;
const MINUTE: Range<usize> = 11..13;
const REST_START: usize = 13;

/// Error returned when a log entry cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Malformed log entry {entry:?}{}: {reason}",
    .index.map_or_else(String::new, |index| format!(" at index {index}"))
)]
pub struct MalformedLogEntry {
    entry: String,
    reason: String,
    index: Option<usize>,
}

impl MalformedLogEntry {
    /// Create an error for `entry`.
    #[must_use]
    pub fn new(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            reason: reason.into(),
            index: None,
        }
    }

    /// Records the position of the entry within its log.
    #[must_use]
    pub const fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// The offending raw entry.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Why decoding failed.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Position in the log, when known.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }
}

/// What happened to a space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A vehicle pulled in (`'I'`)
    PullIn,
    /// A vehicle pulled out (`'O'`)
    PullOut,
    /// Any other single-letter code
    Other(char),
}

impl EventKind {
    /// Interprets an indicator character.
    ///
    /// # Errors
    ///
    /// Returns the rejected character if it is not an ASCII letter.
    pub const fn from_indicator(indicator: char) -> Result<Self, char> {
        match indicator {
            'I' => Ok(Self::PullIn),
            'O' => Ok(Self::PullOut),
            c if c.is_ascii_alphabetic() => Ok(Self::Other(c)),
            c => Err(c),
        }
    }

    /// The indicator character written to the log.
    #[must_use]
    pub const fn indicator(self) -> char {
        match self {
            Self::PullIn => 'I',
            Self::PullOut => 'O',
            Self::Other(c) => c,
        }
    }
}

/// Which view a log is displayed in.
///
/// Lot and space views format entries differently and treat index 0
/// differently; see [`crate::analytics::project_log`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLayout {
    /// Lot view: indicator kept in the first field, full timestamp shown
    Lot,
    /// Space view: year, month, day and hour only
    Space,
}

/// A decoded log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event type
    pub kind: EventKind,
    /// Four-digit year
    pub year: u16,
    /// Two-digit month
    pub month: u8,
    /// Two-digit day
    pub day: u8,
    /// Two-digit hour
    pub hour: u8,
    /// Two-digit minute
    pub minute: u8,
    /// Remaining digits (seconds and anything after)
    pub rest: String,
}

impl DecodedEvent {
    /// Hyphen-joined display string for the given view.
    #[must_use]
    pub fn display(&self, layout: LogLayout) -> String {
        match layout {
            LogLayout::Lot => format!(
                "{}{:04}-{:02}-{:02}-{:02}-{:02}-{}",
                self.kind.indicator(),
                self.year,
                self.month,
                self.day,
                self.hour,
                self.minute,
                self.rest
            ),
            LogLayout::Space => format!(
                "{:04}-{:02}-{:02}-{:02}",
                self.year, self.month, self.day, self.hour
            ),
        }
    }

    /// Re-encodes the entry. Identical to the raw string it was decoded from.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{:04}{:02}{:02}{:02}{:02}{}",
            self.kind.indicator(),
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.rest
        )
    }

    /// Time of day as `hour + minute / 100`, e.g. `13.45` for 13:45.
    #[must_use]
    pub fn hour_minute(&self) -> f64 {
        f64::from(self.hour) + f64::from(self.minute) / 100.0
    }

    /// Calendar timestamp of the event.
    ///
    /// Uses the first two digits of `rest` as seconds.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedLogEntry`] if the fields do not form a real date
    /// and time.
    pub fn timestamp(&self) -> Result<NaiveDateTime, MalformedLogEntry> {
        let second: u32 = self
            .rest
            .get(..2)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MalformedLogEntry::new(self.encode(), "missing seconds"))?;
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
        .and_then(|date| {
            date.and_hms_opt(u32::from(self.hour), u32::from(self.minute), second)
        })
        .ok_or_else(|| MalformedLogEntry::new(self.encode(), "not a valid calendar time"))
    }
}

fn digits<T: std::str::FromStr>(
    raw: &str,
    range: Range<usize>,
    field: &str,
) -> Result<T, MalformedLogEntry> {
    let text = &raw[range];
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MalformedLogEntry::new(
            raw,
            format!("{field} field '{text}' contains non-digit characters"),
        ));
    }
    text.parse()
        .map_err(|_| MalformedLogEntry::new(raw, format!("{field} field '{text}' out of range")))
}

/// Decodes one raw log entry.
///
/// # Errors
///
/// Returns [`MalformedLogEntry`] if the entry is not ASCII, is shorter than
/// [`MIN_ENTRY_LEN`], starts with something other than a letter, or has a
/// non-digit in any numeric field.
pub fn decode(raw: &str) -> Result<DecodedEvent, MalformedLogEntry> {
    if !raw.is_ascii() {
        return Err(MalformedLogEntry::new(raw, "entry must be ASCII"));
    }
    if raw.len() < MIN_ENTRY_LEN {
        return Err(MalformedLogEntry::new(
            raw,
            format!(
                "expected at least {MIN_ENTRY_LEN} characters, found {}",
                raw.len()
            ),
        ));
    }

    let indicator = char::from(raw.as_bytes()[0]);
    let kind = EventKind::from_indicator(indicator).map_err(|c| {
        MalformedLogEntry::new(raw, format!("indicator '{c}' is not a letter"))
    })?;

    let rest = &raw[REST_START..];
    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MalformedLogEntry::new(
            raw,
            format!("trailing field '{rest}' contains non-digit characters"),
        ));
    }

    Ok(DecodedEvent {
        kind,
        year: digits(raw, YEAR, "year")?,
        month: digits(raw, MONTH, "month")?,
        day: digits(raw, DAY, "day")?,
        hour: digits(raw, HOUR, "hour")?,
        minute: digits(raw, MINUTE, "minute")?,
        rest: rest.to_string(),
    })
}

/// Encodes an event at `at` as a 15-character entry.
///
/// Years outside `0..=9999` cannot be represented and are clamped.
#[must_use]
pub fn encode(kind: EventKind, at: NaiveDateTime) -> String {
    let year = at.format("%Y").to_string();
    let year = if year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()) {
        year
    } else if year.starts_with('-') {
        "0000".to_string()
    } else {
        "9999".to_string()
    };
    format!("{}{year}{}", kind.indicator(), at.format("%m%d%H%M%S"))
}

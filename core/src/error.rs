//! Error kinds returned by inventory operations.
//!
//! Every fault is a typed value handed back to the caller; nothing in the
//! core renders messages for end users. The layer above maps
//! [`InventoryError::NotFound`] to its 404 equivalent and so on.

use crate::event_log::MalformedLogEntry;
use crate::key::{EntityKey, InvalidKey};
use crate::store::StoreError;
use thiserror::Error;

/// Errors produced by inventory operations.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// A key was read that has no record, or a required parent is missing.
    #[error("Not found: {0}")]
    NotFound(EntityKey),

    /// A create collided with an existing record.
    #[error("Already exists: {0}")]
    AlreadyExists(EntityKey),

    /// A key or id could not be parsed or built.
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),

    /// A stored occupancy log entry could not be decoded.
    #[error(transparent)]
    MalformedLogEntry(#[from] MalformedLogEntry),

    /// Aggregate counters disagree with the records beneath them.
    #[error("Inconsistent counters at {key}: {detail}")]
    InconsistentCounters {
        /// Record whose counters diverge
        key: EntityKey,
        /// Which counter diverged and by how much
        detail: String,
    },

    /// An argument outside the accepted range (e.g. an oversized batch).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend failed or rejected a commit.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Whether this error is an optimistic concurrency conflict that a
    /// fresh attempt may resolve.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    /// Whether this error reports a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

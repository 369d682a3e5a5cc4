//! Identifier and change-tracking primitives shared by the tree model and
//! the save pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage identifier assigned by the backend to a persisted row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl RowId {
    /// Parent reference stored for the root row.
    pub const ROOT_PARENT: RowId = RowId(0);

    /// Returns true if this is the root sentinel rather than a real row.
    pub fn is_root_parent(self) -> bool {
        self == Self::ROOT_PARENT
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        RowId(value)
    }
}

impl From<RowId> for i64 {
    fn from(value: RowId) -> Self {
        value.0
    }
}

/// Change-tracking tag attached to every record.
///
/// Two records carrying the same [`Generation::Tag`] are assumed to hold the
/// same payload and the save pipeline skips the write without comparing
/// bytes. [`Generation::Unknown`] disables that shortcut and falls back to an
/// exact byte comparison. [`Generation::AlwaysEncode`] forces a write on
/// every save, for payloads whose encoding is not deterministic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Generation {
    /// No generation is tracked for this record.
    #[default]
    Unknown,
    /// Caller-managed, monotonically increasing tag.
    Tag(u64),
    /// Rewrite the row on every save.
    AlwaysEncode,
}

impl Generation {
    /// Returns the next tag, starting from 1 for untracked records.
    ///
    /// `AlwaysEncode` is sticky.
    pub fn next(self) -> Generation {
        match self {
            Generation::Unknown => Generation::Tag(1),
            Generation::Tag(n) => Generation::Tag(n.wrapping_add(1)),
            Generation::AlwaysEncode => Generation::AlwaysEncode,
        }
    }

    /// True when `self` (the new revision) provably matches `previous`
    /// without looking at the payload.
    pub fn unchanged_since(self, previous: Generation) -> bool {
        matches!((previous, self), (Generation::Tag(a), Generation::Tag(b)) if a == b)
    }
}

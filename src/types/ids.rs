//! Newtype wrappers for identifiers.
//!
//! Row ids, tombstone ids and owner identifiers are all plain integers in the
//! database. Wrapping them prevents accidentally comparing a tombstone id with
//! the object identifier it records, which is the easiest mistake to make in
//! the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Primary key of a row in a referencing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RowId {
    fn from(n: u64) -> Self {
        RowId(n)
    }
}

/// Primary key of a tombstone record. Monotonic within a tombstone table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneId(pub u64);

impl fmt::Display for TombstoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TombstoneId {
    fn from(n: u64) -> Self {
        TombstoneId(n)
    }
}

/// Raw identifier of an owning entity, as stored in a weak-reference field and
/// in `Tombstone::object_identifier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(n: u64) -> Self {
        ObjectId(n)
    }
}

/// Identifies a relation: the referencing table plus the weak-reference field.
///
/// Rendered as `table.field`, which is also the suffix of every watermark key
/// belonging to the relation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    pub table: String,
    pub field: String,
}

impl RelationKey {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        RelationKey {
            table: table.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// Error returned when a relation key string is not of the form `table.field`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid relation key {0:?}: expected `table.field`")]
pub struct InvalidRelationKey(pub String);

impl FromStr for RelationKey {
    type Err = InvalidRelationKey;

    /// Splits on the last `.` so that schema-qualified tables
    /// (`schema.table.field`) keep their schema prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((table, field)) if !table.is_empty() && !field.is_empty() => {
                Ok(RelationKey::new(table, field))
            }
            _ => Err(InvalidRelationKey(s.to_string())),
        }
    }
}

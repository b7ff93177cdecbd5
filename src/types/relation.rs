//! Weak-reference relation descriptors.
//!
//! A relation says: "rows of `referencing_table` hold the raw id of an entity
//! in `owning_table` in column `field`, and when that entity is tombstoned,
//! apply `policy` to the row". The owning table lives in another silo, so no
//! foreign key enforces any of this.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::RelationKey;

/// What happens to a referencing row once its owner is confirmed deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Delete the referencing row.
    Delete,
    /// Keep the row, set the reference field to null.
    SetNull,
    /// Leave the row untouched. The watermark still advances.
    Ignore,
}

impl CascadePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadePolicy::Delete => "delete",
            CascadePolicy::SetNull => "set_null",
            CascadePolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for CascadePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database partition. Every relation is processed by exactly one silo mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiloMode {
    Control,
    Region,
}

impl SiloMode {
    pub const ALL: [SiloMode; 2] = [SiloMode::Control, SiloMode::Region];

    pub fn as_str(&self) -> &'static str {
        match self {
            SiloMode::Control => "control",
            SiloMode::Region => "region",
        }
    }

    /// The tombstone table replicated into this silo.
    ///
    /// Relations with affinity to a silo reconcile against this table, since it
    /// is the one co-located with their referencing rows.
    pub fn tombstone_table(&self) -> &'static str {
        match self {
            SiloMode::Control => "control_tombstones",
            SiloMode::Region => "region_tombstones",
        }
    }
}

impl fmt::Display for SiloMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown silo mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown silo mode {0:?}: expected `control` or `region`")]
pub struct UnknownSiloMode(pub String);

impl FromStr for SiloMode {
    type Err = UnknownSiloMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" => Ok(SiloMode::Control),
            "region" => Ok(SiloMode::Region),
            _ => Err(UnknownSiloMode(s.to_string())),
        }
    }
}

/// The declared kind of the referencing field.
///
/// Only weak references can be reconciled. The other kinds exist so that a
/// misregistered relation is representable in configuration and can be
/// rejected when it is processed, instead of failing the whole registry load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    WeakReference,
    ForeignKey,
    Plain,
}

/// A relation whose field is not a weak reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field {key} is registered as {kind:?}, not as a weak reference")]
pub struct NotWeakReference {
    pub key: RelationKey,
    pub kind: FieldKind,
}

/// A statically registered weak-reference relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Table holding the referencing rows.
    pub referencing_table: String,

    /// Column in `referencing_table` holding the owner's raw id.
    pub field: String,

    /// Owning table name as recorded in `Tombstone::table_name`. Opaque: the
    /// owning schema is not visible from the referencing silo.
    pub owning_table: String,

    pub policy: CascadePolicy,

    /// Silo this relation's referencing rows live in.
    pub silo: SiloMode,

    #[serde(default)]
    pub field_kind: FieldKind,
}

impl Relation {
    pub fn new(
        referencing_table: impl Into<String>,
        field: impl Into<String>,
        owning_table: impl Into<String>,
        policy: CascadePolicy,
        silo: SiloMode,
    ) -> Self {
        Relation {
            referencing_table: referencing_table.into(),
            field: field.into(),
            owning_table: owning_table.into(),
            policy,
            silo,
            field_kind: FieldKind::WeakReference,
        }
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(&self.referencing_table, &self.field)
    }

    /// Tombstone table this relation reconciles against.
    pub fn tombstone_table(&self) -> &'static str {
        self.silo.tombstone_table()
    }

    /// Fails if the field was registered as anything but a weak reference.
    pub fn ensure_weak_reference(&self) -> Result<(), NotWeakReference> {
        match self.field_kind {
            FieldKind::WeakReference => Ok(()),
            kind => Err(NotWeakReference {
                key: self.key(),
                kind,
            }),
        }
    }
}

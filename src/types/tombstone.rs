//! Tombstone records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ObjectId, TombstoneId};

/// Marker recording the permanent deletion of an entity in its owning domain.
///
/// Tombstones are written by the deletion pipeline and never modified. The
/// same object may be tombstoned more than once (e.g. a retried deletion), in
/// which case every copy matches the same referencing rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: TombstoneId,

    /// Owning table of the deleted entity.
    pub table_name: String,

    /// Raw id of the deleted entity.
    pub object_identifier: ObjectId,

    pub created_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn new(
        id: impl Into<TombstoneId>,
        table_name: impl Into<String>,
        object_identifier: impl Into<ObjectId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Tombstone {
            id: id.into(),
            table_name: table_name.into(),
            object_identifier: object_identifier.into(),
            created_at,
        }
    }
}

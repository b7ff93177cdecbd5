//! Core domain types for tombstone cascading.
//!
//! Relations are static configuration; tombstones are immutable input;
//! watermarks are the only state that survives between invocations.

pub mod ids;
pub mod relation;
pub mod tombstone;
pub mod watermark;

// Re-export commonly used types at the module level
pub use ids::{InvalidRelationKey, ObjectId, RelationKey, RowId, TombstoneId};
pub use relation::{CascadePolicy, FieldKind, NotWeakReference, Relation, SiloMode, UnknownSiloMode};
pub use tombstone::Tombstone;
pub use watermark::{
    Batch, ScanDirection, UnknownScanDirection, Watermark, WatermarkKey, fresh_transaction_id,
};

//! Watermark persistence.
//!
//! Watermarks are the only state that crosses invocation boundaries. This
//! module defines the store contract and two implementations:
//! - [`MemoryWatermarkStore`]: process-local, for tests and dry runs
//! - [`FileWatermarkStore`]: a single JSON document rewritten atomically
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   watermarks.json       # every watermark, keyed by `{direction}.{table}.{field}`
//!   watermarks.json.tmp   # only present while a write is in flight
//! ```
//!
//! # Crash Safety
//!
//! The orchestrator commits a watermark strictly after applying the cascade
//! for its window. A crash before the commit makes the next invocation
//! reprocess the same window, and every cascade is idempotent.

pub mod fsync;
pub mod snapshot;
pub mod store;

pub use fsync::{fsync_dir, fsync_file};
pub use snapshot::{
    SCHEMA_VERSION, SnapshotError, WatermarkSnapshot, load_snapshot, save_snapshot_atomic,
    try_load_snapshot,
};
pub use store::{FileWatermarkStore, MemoryWatermarkStore, WatermarkError, WatermarkStore};

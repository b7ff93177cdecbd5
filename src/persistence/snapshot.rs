//! On-disk format of the file-backed watermark store.
//!
//! All watermarks live in a single JSON document. It is rewritten in full on
//! every update using write-to-temp-then-rename:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<path>`
//! 4. fsync the parent directory
//!
//! Readers therefore see either the previous or the new document, never a
//! partial write. A crash between steps leaves the previous document intact,
//! which only means the last window is processed again.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::Watermark;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Every persisted watermark, keyed by rendered `WatermarkKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkSnapshot {
    pub schema_version: u32,

    /// When the document was last written.
    pub snapshot_at: DateTime<Utc>,

    pub watermarks: BTreeMap<String, Watermark>,
}

impl WatermarkSnapshot {
    pub fn new() -> Self {
        WatermarkSnapshot {
            schema_version: SCHEMA_VERSION,
            snapshot_at: Utc::now(),
            watermarks: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.snapshot_at = Utc::now();
    }
}

impl Default for WatermarkSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the snapshot atomically.
pub fn save_snapshot_atomic(path: &Path, snapshot: &WatermarkSnapshot) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<WatermarkSnapshot> {
    let bytes = std::fs::read(path)?;
    let snapshot: WatermarkSnapshot = serde_json::from_slice(&bytes)?;

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }

    Ok(snapshot)
}

/// Loads the snapshot, returning `None` if the file does not exist yet.
pub fn try_load_snapshot(path: &Path) -> Result<Option<WatermarkSnapshot>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

//! The watermark store contract and its implementations.
//!
//! The store holds one cursor per (relation, direction). It needs no
//! compare-and-swap: at steady state only one invocation per key is in flight,
//! and when two race the later commit wins. Both invocations started from an
//! already committed `low`, so the race costs redundant work, never
//! correctness.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use super::snapshot::{SnapshotError, WatermarkSnapshot, save_snapshot_atomic, try_load_snapshot};
use crate::types::{Watermark, WatermarkKey, fresh_transaction_id};

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The backing store could not be reached.
    #[error("watermark store unavailable: {0}")]
    Unavailable(String),
}

impl WatermarkError {
    /// Whether re-running the invocation later can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WatermarkError::Snapshot(SnapshotError::SchemaMismatch { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, WatermarkError>;

/// Persists a progress cursor per watermark key.
pub trait WatermarkStore: Send + Sync {
    /// Returns the watermark for `key`, creating it at `low = 0` with a fresh
    /// token on first access.
    fn get(&self, key: &WatermarkKey) -> impl Future<Output = Result<Watermark>> + Send;

    /// Unconditionally overwrites the watermark for `key`.
    fn set(
        &self,
        key: &WatermarkKey,
        low: u64,
        transaction_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Moves the cursor back to zero and rotates the token.
    fn reset(&self, key: &WatermarkKey) -> impl Future<Output = Result<Watermark>> + Send;
}

/// Process-local store. Watermarks are lost on restart, which is safe: every
/// relation is simply rescanned from the beginning.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    watermarks: Mutex<HashMap<String, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a watermark without creating it.
    pub fn peek(&self, key: &WatermarkKey) -> Option<Watermark> {
        self.watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.to_string())
            .cloned()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Watermark> {
        let mut watermarks = self.watermarks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(watermarks
            .entry(key.to_string())
            .or_insert_with(Watermark::initial)
            .clone())
    }

    async fn set(&self, key: &WatermarkKey, low: u64, transaction_id: &str) -> Result<()> {
        let mut watermarks = self.watermarks.lock().unwrap_or_else(PoisonError::into_inner);
        watermarks.insert(
            key.to_string(),
            Watermark {
                low,
                transaction_id: transaction_id.to_string(),
            },
        );
        Ok(())
    }

    async fn reset(&self, key: &WatermarkKey) -> Result<Watermark> {
        let watermark = Watermark::initial();
        let mut watermarks = self.watermarks.lock().unwrap_or_else(PoisonError::into_inner);
        watermarks.insert(key.to_string(), watermark.clone());
        Ok(watermark)
    }
}

/// Store backed by a single atomically rewritten JSON document.
///
/// The in-memory copy is only replaced after the new document is durable, so
/// a failed write leaves both the file and the cache at the previous state.
///
/// Writes, fsyncs and renames run synchronously on the calling task, under
/// the snapshot lock. The single serial worker is the only frequent writer,
/// so the runtime thread is blocked for one small file write per commit.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    snapshot: Mutex<WatermarkSnapshot>,
}

impl FileWatermarkStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = try_load_snapshot(&path)?.unwrap_or_default();
        debug!(
            path = %path.display(),
            watermarks = snapshot.watermarks.len(),
            "Opened watermark store"
        );
        Ok(FileWatermarkStore {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a watermark without creating it.
    pub fn peek(&self, key: &WatermarkKey) -> Option<Watermark> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watermarks
            .get(&key.to_string())
            .cloned()
    }

    fn update<T>(&self, f: impl FnOnce(&mut WatermarkSnapshot) -> T) -> Result<T> {
        let mut current = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = current.clone();
        let out = f(&mut next);
        next.touch();
        save_snapshot_atomic(&self.path, &next)?;
        *current = next;
        Ok(out)
    }
}

impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Watermark> {
        let rendered = key.to_string();
        if let Some(existing) = self.peek(key) {
            return Ok(existing);
        }
        self.update(|snapshot| {
            snapshot
                .watermarks
                .entry(rendered)
                .or_insert_with(Watermark::initial)
                .clone()
        })
    }

    async fn set(&self, key: &WatermarkKey, low: u64, transaction_id: &str) -> Result<()> {
        let watermark = Watermark {
            low,
            transaction_id: transaction_id.to_string(),
        };
        self.update(|snapshot| {
            snapshot.watermarks.insert(key.to_string(), watermark);
        })
    }

    async fn reset(&self, key: &WatermarkKey) -> Result<Watermark> {
        let watermark = Watermark {
            low: 0,
            transaction_id: fresh_transaction_id(),
        };
        self.update(|snapshot| {
            snapshot
                .watermarks
                .insert(key.to_string(), watermark.clone());
            watermark
        })
    }
}

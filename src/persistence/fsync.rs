//! fsync helpers used by the file-backed watermark store.
//!
//! A rename is only durable once the containing directory has been synced, so
//! atomic writes sync both the temp file and its parent directory.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flushes a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to disk.
///
/// Must be called with a directory path; fails if the path does not exist.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir_path)?.sync_all()
}

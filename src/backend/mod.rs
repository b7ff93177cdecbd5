//! Relational query backend.
//!
//! The cascade core never talks to a database directly. Everything it needs
//! from the relational layer goes through [`QueryBackend`]: scoped MIN/MAX
//! aggregates, windowed and `IN` selects, the tombstone join, and the two bulk
//! mutations. `route_for` tells the reconciler whether the referencing table
//! and the tombstone table share a physical database, which decides between
//! the single-join path and the two-step cross-database path.
//!
//! [`MemoryBackend`] is an in-process implementation with per-table routing,
//! used by the tests and by the binary when no real database is attached.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ObjectId, RowId, ScanDirection, Tombstone};

pub mod memory;

pub use memory::{Dataset, MemoryBackend};

/// Identifies a physical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseId(pub String);

impl DatabaseId {
    pub fn new(s: impl Into<String>) -> Self {
        DatabaseId(s.into())
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection or query failure; the invocation can be retried.
    #[error("query backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table {0}")]
    UnknownTable(String),

    /// A join was requested across two physical databases.
    #[error("cannot join {left} ({left_db}) with {right} ({right_db}) across databases")]
    CrossDatabaseJoin {
        left: String,
        left_db: DatabaseId,
        right: String,
        right_db: DatabaseId,
    },
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Smallest and largest id present in a scoped table. Both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

/// A referencing row projected to its id and the raw owner id it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRef {
    pub id: RowId,
    /// `None` once the field has been nulled.
    pub owner: Option<ObjectId>,
}

/// One result row of the tombstone join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedRow {
    pub row_id: RowId,
    pub created_at: DateTime<Utc>,
}

/// Parameters of the same-database join:
///
/// ```text
/// SELECT r.id, t.created_at
/// FROM {referencing_table} r
/// JOIN {tombstone_table} t
///   ON t.table_name = {owning_table} AND t.object_identifier = r.{field}
/// WHERE {bound}.id > {low} AND {bound}.id <= {up}
/// ```
///
/// where `bound` is `r` for [`ScanDirection::Row`] and `t` for
/// [`ScanDirection::Tombstone`].
#[derive(Debug, Clone, Copy)]
pub struct JoinQuery<'a> {
    pub referencing_table: &'a str,
    pub field: &'a str,
    pub tombstone_table: &'a str,
    pub owning_table: &'a str,
    pub bound: ScanDirection,
    pub low: u64,
    pub up: u64,
}

/// Queries and bulk mutations used by the cascade core.
///
/// Windows are always half-open on the left: `(low, up]`.
pub trait QueryBackend: Send + Sync {
    /// Physical database holding `table`.
    fn route_for(&self, table: &str) -> DatabaseId;

    /// MIN/MAX id of a referencing table; `None` when the table is empty.
    fn row_id_range(&self, table: &str) -> impl Future<Output = Result<Option<IdRange>>> + Send;

    /// MIN/MAX id of the tombstones recorded for `owning_table`.
    fn tombstone_id_range(
        &self,
        tombstone_table: &str,
        owning_table: &str,
    ) -> impl Future<Output = Result<Option<IdRange>>> + Send;

    /// Rows with ids in `(low, up]`, projected to `(id, field)`.
    fn rows_in_window(
        &self,
        table: &str,
        field: &str,
        low: u64,
        up: u64,
    ) -> impl Future<Output = Result<Vec<RowRef>>> + Send;

    /// Ids of rows whose `field` is one of `owners`, across the whole table.
    fn rows_referencing(
        &self,
        table: &str,
        field: &str,
        owners: &[ObjectId],
    ) -> impl Future<Output = Result<Vec<RowId>>> + Send;

    /// Tombstones for `owning_table` with ids in `(low, up]`.
    fn tombstones_in_window(
        &self,
        tombstone_table: &str,
        owning_table: &str,
        low: u64,
        up: u64,
    ) -> impl Future<Output = Result<Vec<Tombstone>>> + Send;

    /// Tombstones for `owning_table` whose object identifier is one of
    /// `objects`, across the whole tombstone table.
    fn tombstones_for_objects(
        &self,
        tombstone_table: &str,
        owning_table: &str,
        objects: &[ObjectId],
    ) -> impl Future<Output = Result<Vec<Tombstone>>> + Send;

    /// Runs the tombstone join. Only valid when both tables share a database.
    fn join_tombstoned_rows(
        &self,
        query: &JoinQuery<'_>,
    ) -> impl Future<Output = Result<Vec<JoinedRow>>> + Send;

    /// Deletes at most `chunk_size` of `ids` and reports whether any of them
    /// remain afterwards. Ids that no longer exist are ignored.
    fn delete_chunk(
        &self,
        table: &str,
        ids: &[RowId],
        transaction_id: &str,
        chunk_size: usize,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Sets `field` to null on every row in `ids`. Returns the number of rows
    /// that still existed.
    fn null_out(
        &self,
        table: &str,
        field: &str,
        ids: &[RowId],
    ) -> impl Future<Output = Result<usize>> + Send;
}

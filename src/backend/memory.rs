//! In-memory query backend.
//!
//! Tables are ordered maps keyed by primary key, which makes windowed scans
//! and MIN/MAX cheap. Every table is routed to a database (a default one
//! unless overridden), and joins across databases are refused the same way a
//! real engine would refuse them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use tracing::trace;

use super::{
    BackendError, DatabaseId, IdRange, JoinQuery, JoinedRow, QueryBackend, Result, RowRef,
};
use crate::registry::RelationRegistry;
use crate::types::{ObjectId, RowId, ScanDirection, SiloMode, Tombstone, TombstoneId};

/// Name of the database tables are routed to unless configured otherwise.
pub const DEFAULT_DATABASE: &str = "default";

/// Weak-reference columns of one row.
type Row = BTreeMap<String, Option<ObjectId>>;

#[derive(Debug, Default)]
struct MemoryState {
    routes: HashMap<String, DatabaseId>,
    tables: HashMap<String, BTreeMap<RowId, Row>>,
    tombstones: HashMap<String, BTreeMap<TombstoneId, Tombstone>>,
    deletion_log: Vec<DeletionRecord>,
    unavailable: bool,
}

/// One call to `delete_chunk` that removed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRecord {
    pub table: String,
    pub transaction_id: String,
    pub deleted: Vec<RowId>,
}

/// Seed data for a [`MemoryBackend`], loadable from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct Dataset {
    /// Table name to database name. Unlisted tables use the default database.
    #[serde(default)]
    pub routes: HashMap<String, String>,

    #[serde(default)]
    pub rows: Vec<DatasetRow>,

    #[serde(default)]
    pub tombstones: Vec<DatasetTombstone>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetRow {
    pub table: String,
    pub id: u64,
    pub fields: BTreeMap<String, Option<u64>>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetTombstone {
    pub silo: SiloMode,
    #[serde(flatten)]
    pub tombstone: Tombstone,
}

#[derive(Debug)]
pub struct MemoryBackend {
    default_database: DatabaseId,
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty backend with both silos' tombstone tables present.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        for silo in SiloMode::ALL {
            state
                .tombstones
                .insert(silo.tombstone_table().to_string(), BTreeMap::new());
        }
        MemoryBackend {
            default_database: DatabaseId::new(DEFAULT_DATABASE),
            state: Mutex::new(state),
        }
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let backend = Self::new();
        for (table, database) in dataset.routes {
            backend.route_table(table, DatabaseId::new(database));
        }
        for row in dataset.rows {
            for (field, owner) in row.fields {
                backend.insert_row(&row.table, RowId(row.id), &field, owner.map(ObjectId));
            }
        }
        for entry in dataset.tombstones {
            backend.insert_tombstone(entry.silo, entry.tombstone);
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the state, failing if the backend has been marked unavailable.
    fn available(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.lock();
        if state.unavailable {
            return Err(BackendError::Unavailable(
                "backend marked unavailable".to_string(),
            ));
        }
        Ok(state)
    }

    /// Routes `table` to `database`.
    pub fn route_table(&self, table: impl Into<String>, database: DatabaseId) {
        self.lock().routes.insert(table.into(), database);
    }

    /// Creates an empty referencing table if it does not exist.
    pub fn create_table(&self, table: impl Into<String>) {
        self.lock().tables.entry(table.into()).or_default();
    }

    /// Creates every referencing table named by `registry`, so relations
    /// with no rows scan as empty rather than as unknown tables.
    pub fn provision(&self, registry: &RelationRegistry) {
        let mut state = self.lock();
        for relation in registry.iter() {
            state
                .tables
                .entry(relation.referencing_table.clone())
                .or_default();
        }
    }

    /// Inserts a row, or sets `field` on an existing one.
    pub fn insert_row(&self, table: &str, id: RowId, field: &str, owner: Option<ObjectId>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .insert(field.to_string(), owner);
    }

    pub fn insert_tombstone(&self, silo: SiloMode, tombstone: Tombstone) {
        self.lock()
            .tombstones
            .entry(silo.tombstone_table().to_string())
            .or_default()
            .insert(tombstone.id, tombstone);
    }

    /// Value of `field` on a row: `None` if the row does not exist,
    /// `Some(None)` if the field is null.
    pub fn field_value(&self, table: &str, id: RowId, field: &str) -> Option<Option<ObjectId>> {
        self.lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(&id))
            .map(|row| row.get(field).copied().flatten())
    }

    pub fn row_exists(&self, table: &str, id: RowId) -> bool {
        self.lock()
            .tables
            .get(table)
            .is_some_and(|rows| rows.contains_key(&id))
    }

    pub fn row_ids(&self, table: &str) -> Vec<RowId> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn deletion_log(&self) -> Vec<DeletionRecord> {
        self.lock().deletion_log.clone()
    }

    /// Makes every subsequent query fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

impl MemoryState {
    fn table(&self, table: &str) -> Result<&BTreeMap<RowId, Row>> {
        self.tables
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut BTreeMap<RowId, Row>> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
    }

    /// Tombstones of `tombstone_table` recorded against `owning_table`.
    fn tombstones_for<'a>(
        &'a self,
        tombstone_table: &str,
        owning_table: &'a str,
    ) -> Result<impl Iterator<Item = &'a Tombstone> + 'a> {
        let tombstones = self
            .tombstones
            .get(tombstone_table)
            .ok_or_else(|| BackendError::UnknownTable(tombstone_table.to_string()))?;
        Ok(tombstones
            .values()
            .filter(move |t| t.table_name == owning_table))
    }
}

fn owner_of(row: &Row, field: &str) -> Option<ObjectId> {
    row.get(field).copied().flatten()
}

impl QueryBackend for MemoryBackend {
    fn route_for(&self, table: &str) -> DatabaseId {
        self.lock()
            .routes
            .get(table)
            .cloned()
            .unwrap_or_else(|| self.default_database.clone())
    }

    async fn row_id_range(&self, table: &str) -> Result<Option<IdRange>> {
        let state = self.available()?;
        let rows = state.table(table)?;
        Ok(match (rows.keys().next(), rows.keys().next_back()) {
            (Some(min), Some(max)) => Some(IdRange {
                min: min.0,
                max: max.0,
            }),
            _ => None,
        })
    }

    async fn tombstone_id_range(
        &self,
        tombstone_table: &str,
        owning_table: &str,
    ) -> Result<Option<IdRange>> {
        let state = self.available()?;
        let mut ids = state
            .tombstones_for(tombstone_table, owning_table)?
            .map(|t| t.id.0);
        let Some(first) = ids.next() else {
            return Ok(None);
        };
        let (min, max) = ids.fold((first, first), |(lo, hi), id| (lo.min(id), hi.max(id)));
        Ok(Some(IdRange { min, max }))
    }

    async fn rows_in_window(
        &self,
        table: &str,
        field: &str,
        low: u64,
        up: u64,
    ) -> Result<Vec<RowRef>> {
        let state = self.available()?;
        if low >= up {
            return Ok(Vec::new());
        }
        let rows = state.table(table)?;
        Ok(rows
            .range(RowId(low + 1)..=RowId(up))
            .map(|(id, row)| RowRef {
                id: *id,
                owner: owner_of(row, field),
            })
            .collect())
    }

    async fn rows_referencing(
        &self,
        table: &str,
        field: &str,
        owners: &[ObjectId],
    ) -> Result<Vec<RowId>> {
        let state = self.available()?;
        let rows = state.table(table)?;
        let owners: BTreeSet<ObjectId> = owners.iter().copied().collect();
        Ok(rows
            .iter()
            .filter(|(_, row)| owner_of(row, field).is_some_and(|o| owners.contains(&o)))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn tombstones_in_window(
        &self,
        tombstone_table: &str,
        owning_table: &str,
        low: u64,
        up: u64,
    ) -> Result<Vec<Tombstone>> {
        let state = self.available()?;
        Ok(state
            .tombstones_for(tombstone_table, owning_table)?
            .filter(|t| t.id.0 > low && t.id.0 <= up)
            .cloned()
            .collect())
    }

    async fn tombstones_for_objects(
        &self,
        tombstone_table: &str,
        owning_table: &str,
        objects: &[ObjectId],
    ) -> Result<Vec<Tombstone>> {
        let state = self.available()?;
        let objects: BTreeSet<ObjectId> = objects.iter().copied().collect();
        Ok(state
            .tombstones_for(tombstone_table, owning_table)?
            .filter(|t| objects.contains(&t.object_identifier))
            .cloned()
            .collect())
    }

    async fn join_tombstoned_rows(&self, query: &JoinQuery<'_>) -> Result<Vec<JoinedRow>> {
        let left_db = self.route_for(query.referencing_table);
        let right_db = self.route_for(query.tombstone_table);
        if left_db != right_db {
            return Err(BackendError::CrossDatabaseJoin {
                left: query.referencing_table.to_string(),
                left_db,
                right: query.tombstone_table.to_string(),
                right_db,
            });
        }

        let state = self.available()?;
        let rows = state.table(query.referencing_table)?;
        let tombstones: Vec<&Tombstone> = state
            .tombstones_for(query.tombstone_table, query.owning_table)?
            .collect();
        let in_window = |id: u64| id > query.low && id <= query.up;

        let mut joined = Vec::new();
        for (row_id, row) in rows {
            let Some(owner) = owner_of(row, query.field) else {
                continue;
            };
            if query.bound == ScanDirection::Row && !in_window(row_id.0) {
                continue;
            }
            for tombstone in &tombstones {
                if tombstone.object_identifier != owner {
                    continue;
                }
                if query.bound == ScanDirection::Tombstone && !in_window(tombstone.id.0) {
                    continue;
                }
                joined.push(JoinedRow {
                    row_id: *row_id,
                    created_at: tombstone.created_at,
                });
            }
        }
        Ok(joined)
    }

    async fn delete_chunk(
        &self,
        table: &str,
        ids: &[RowId],
        transaction_id: &str,
        chunk_size: usize,
    ) -> Result<bool> {
        let mut state = self.available()?;
        let rows = state.table_mut(table)?;
        let present: Vec<RowId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|id| rows.contains_key(id))
            .collect();

        let chunk: Vec<RowId> = present.iter().copied().take(chunk_size.max(1)).collect();
        for id in &chunk {
            rows.remove(id);
        }
        let has_more = present.len() > chunk.len();
        trace!(
            table,
            transaction_id,
            deleted = chunk.len(),
            has_more,
            "Deleted chunk"
        );

        if !chunk.is_empty() {
            state.deletion_log.push(DeletionRecord {
                table: table.to_string(),
                transaction_id: transaction_id.to_string(),
                deleted: chunk,
            });
        }
        Ok(has_more)
    }

    async fn null_out(&self, table: &str, field: &str, ids: &[RowId]) -> Result<usize> {
        let mut state = self.available()?;
        let rows = state.table_mut(table)?;
        let mut updated = 0;
        for id in ids.iter().collect::<BTreeSet<_>>() {
            if let Some(row) = rows.get_mut(id) {
                row.insert(field.to_string(), None);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

//! Tombstone reconciliation.
//!
//! Given a relation, a scan direction and a window, find the referencing rows
//! whose owner has been tombstoned. When the referencing table and the
//! tombstone table live in the same database this is one join. Otherwise it
//! takes two steps, bounded on whichever side the direction walks:
//!
//! - **Row-bounded**: rows in the window → distinct owner ids → tombstones for
//!   those owners (any tombstone id) → every row mapped to a matched owner.
//! - **Tombstone-bounded**: tombstones in the window → their object ids → rows
//!   referencing those ids (any row id).
//!
//! Both paths yield the same set of row ids for the same data. Results are not
//! deduplicated: an owner tombstoned twice reports its rows twice, and the
//! executor tolerates that.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::backend::{JoinQuery, QueryBackend, Result};
use crate::types::{Batch, ObjectId, Relation, RowId, ScanDirection};

/// Which lookup strategy a relation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePath {
    /// Referencing and tombstone tables share a database: single join.
    SameDatabase,
    /// Two-step lookup across databases.
    CrossDatabase,
}

/// Rows affected by tombstones within one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub row_ids: Vec<RowId>,
    /// Oldest `created_at` among the tombstones considered.
    pub oldest_seen: Option<DateTime<Utc>>,
}

impl Reconciliation {
    fn observe(&mut self, created_at: DateTime<Utc>) {
        self.oldest_seen = Some(match self.oldest_seen {
            Some(oldest) => oldest.min(created_at),
            None => created_at,
        });
    }
}

/// Picks the join path when routing puts both tables in one database.
pub fn choose_path<B: QueryBackend>(backend: &B, relation: &Relation) -> ReconcilePath {
    if backend.route_for(&relation.referencing_table) == backend.route_for(relation.tombstone_table())
    {
        ReconcilePath::SameDatabase
    } else {
        ReconcilePath::CrossDatabase
    }
}

/// Resolves the affected rows for `batch`, choosing the path from routing.
pub async fn reconcile<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    direction: ScanDirection,
    batch: &Batch,
) -> Result<Reconciliation> {
    let path = choose_path(backend, relation);
    reconcile_with_path(backend, relation, direction, batch, path).await
}

/// Resolves the affected rows for `batch` using an explicit path.
pub async fn reconcile_with_path<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    direction: ScanDirection,
    batch: &Batch,
    path: ReconcilePath,
) -> Result<Reconciliation> {
    let result = match (path, direction) {
        (ReconcilePath::SameDatabase, _) => {
            same_database(backend, relation, direction, batch).await?
        }
        (ReconcilePath::CrossDatabase, ScanDirection::Row) => {
            row_bounded(backend, relation, batch).await?
        }
        (ReconcilePath::CrossDatabase, ScanDirection::Tombstone) => {
            tombstone_bounded(backend, relation, batch).await?
        }
    };
    log_anomalies(relation, direction, &result);
    trace!(
        relation = %relation.key(),
        %direction,
        ?path,
        low = batch.low,
        up = batch.up,
        affected = result.row_ids.len(),
        "Reconciled window"
    );
    Ok(result)
}

/// Logs double deletes and tombstones whose owner is no longer referenced.
/// Neither affects the outcome.
fn log_anomalies(relation: &Relation, direction: ScanDirection, result: &Reconciliation) {
    if direction == ScanDirection::Tombstone
        && result.oldest_seen.is_some()
        && result.row_ids.is_empty()
    {
        debug!(
            relation = %relation.key(),
            "Tombstones in window match no referencing rows"
        );
    }

    let distinct = result.row_ids.iter().collect::<BTreeSet<_>>().len();
    if distinct != result.row_ids.len() {
        debug!(
            relation = %relation.key(),
            %direction,
            repeated = result.row_ids.len() - distinct,
            "Owner tombstoned more than once"
        );
    }
}

async fn same_database<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    direction: ScanDirection,
    batch: &Batch,
) -> Result<Reconciliation> {
    let joined = backend
        .join_tombstoned_rows(&JoinQuery {
            referencing_table: &relation.referencing_table,
            field: &relation.field,
            tombstone_table: relation.tombstone_table(),
            owning_table: &relation.owning_table,
            bound: direction,
            low: batch.low,
            up: batch.up,
        })
        .await?;

    let mut result = Reconciliation::default();
    for row in joined {
        result.row_ids.push(row.row_id);
        result.observe(row.created_at);
    }
    Ok(result)
}

async fn row_bounded<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    batch: &Batch,
) -> Result<Reconciliation> {
    let rows = backend
        .rows_in_window(
            &relation.referencing_table,
            &relation.field,
            batch.low,
            batch.up,
        )
        .await?;

    // Several rows can point at the same owner.
    let mut by_owner: BTreeMap<ObjectId, Vec<RowId>> = BTreeMap::new();
    for row in rows {
        if let Some(owner) = row.owner {
            by_owner.entry(owner).or_default().push(row.id);
        }
    }
    if by_owner.is_empty() {
        return Ok(Reconciliation::default());
    }

    let owners: Vec<ObjectId> = by_owner.keys().copied().collect();
    let tombstones = backend
        .tombstones_for_objects(relation.tombstone_table(), &relation.owning_table, &owners)
        .await?;

    let mut result = Reconciliation::default();
    for tombstone in tombstones {
        let Some(row_ids) = by_owner.get(&tombstone.object_identifier) else {
            continue;
        };
        result.row_ids.extend_from_slice(row_ids);
        result.observe(tombstone.created_at);
    }
    Ok(result)
}

async fn tombstone_bounded<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    batch: &Batch,
) -> Result<Reconciliation> {
    let tombstones = backend
        .tombstones_in_window(
            relation.tombstone_table(),
            &relation.owning_table,
            batch.low,
            batch.up,
        )
        .await?;
    if tombstones.is_empty() {
        return Ok(Reconciliation::default());
    }

    let mut result = Reconciliation::default();
    let mut objects = Vec::with_capacity(tombstones.len());
    for tombstone in &tombstones {
        objects.push(tombstone.object_identifier);
        result.observe(tombstone.created_at);
    }
    objects.sort_unstable();
    let before = objects.len();
    objects.dedup();
    if objects.len() != before {
        debug!(
            relation = %relation.key(),
            duplicates = before - objects.len(),
            "Window contains repeated tombstones for the same object"
        );
    }

    result.row_ids = backend
        .rows_referencing(&relation.referencing_table, &relation.field, &objects)
        .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DatabaseId, MemoryBackend};
    use crate::types::{CascadePolicy, SiloMode, Tombstone};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn relation() -> Relation {
        Relation::new(
            "sentry_rule",
            "owner_user_id",
            "auth_user",
            CascadePolicy::SetNull,
            SiloMode::Region,
        )
    }

    fn batch(low: u64, up: u64) -> Batch {
        Batch {
            low,
            up,
            has_more: false,
            transaction_id: "txn".to_string(),
        }
    }

    /// Rows 1..=3 pointing at 100, 200, 100; owner 100 tombstoned.
    fn scenario_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert_row("sentry_rule", RowId(1), "owner_user_id", Some(ObjectId(100)));
        backend.insert_row("sentry_rule", RowId(2), "owner_user_id", Some(ObjectId(200)));
        backend.insert_row("sentry_rule", RowId(3), "owner_user_id", Some(ObjectId(100)));
        backend.insert_tombstone(
            SiloMode::Region,
            Tombstone::new(1u64, "auth_user", 100u64, ts(0)),
        );
        backend
    }

    fn sorted(ids: &[RowId]) -> Vec<RowId> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids
    }

    #[test]
    fn shared_route_picks_join_path() {
        let backend = scenario_backend();
        assert_eq!(choose_path(&backend, &relation()), ReconcilePath::SameDatabase);

        backend.route_table("sentry_rule", DatabaseId::new("region-secondary"));
        assert_eq!(choose_path(&backend, &relation()), ReconcilePath::CrossDatabase);
    }

    #[tokio::test]
    async fn row_bounded_emits_every_row_of_a_tombstoned_owner() {
        let backend = scenario_backend();
        let result = reconcile_with_path(
            &backend,
            &relation(),
            ScanDirection::Row,
            &batch(0, 3),
            ReconcilePath::CrossDatabase,
        )
        .await
        .unwrap();

        assert_eq!(sorted(&result.row_ids), vec![RowId(1), RowId(3)]);
        assert_eq!(result.oldest_seen, Some(ts(0)));
    }

    #[tokio::test]
    async fn row_bounded_respects_window() {
        let backend = scenario_backend();
        let result = reconcile_with_path(
            &backend,
            &relation(),
            ScanDirection::Row,
            &batch(0, 2),
            ReconcilePath::CrossDatabase,
        )
        .await
        .unwrap();

        assert_eq!(result.row_ids, vec![RowId(1)]);
    }

    #[tokio::test]
    async fn tombstone_bounded_scans_all_rows() {
        let backend = scenario_backend();
        let result = reconcile_with_path(
            &backend,
            &relation(),
            ScanDirection::Tombstone,
            &batch(0, 1),
            ReconcilePath::CrossDatabase,
        )
        .await
        .unwrap();

        assert_eq!(sorted(&result.row_ids), vec![RowId(1), RowId(3)]);
        assert_eq!(result.oldest_seen, Some(ts(0)));
    }

    #[tokio::test]
    async fn tombstone_bounded_tracks_oldest_even_without_matches() {
        let backend = scenario_backend();
        backend.insert_tombstone(
            SiloMode::Region,
            Tombstone::new(2u64, "auth_user", 999u64, ts(-60)),
        );

        let result = reconcile_with_path(
            &backend,
            &relation(),
            ScanDirection::Tombstone,
            &batch(1, 2),
            ReconcilePath::CrossDatabase,
        )
        .await
        .unwrap();

        assert!(result.row_ids.is_empty());
        assert_eq!(result.oldest_seen, Some(ts(-60)));
    }

    #[tokio::test]
    async fn tombstones_for_other_tables_are_ignored() {
        let backend = scenario_backend();
        backend.insert_tombstone(
            SiloMode::Region,
            Tombstone::new(2u64, "sentry_team", 200u64, ts(0)),
        );

        for path in [ReconcilePath::SameDatabase, ReconcilePath::CrossDatabase] {
            let result = reconcile_with_path(
                &backend,
                &relation(),
                ScanDirection::Row,
                &batch(0, 3),
                path,
            )
            .await
            .unwrap();
            assert!(!result.row_ids.contains(&RowId(2)), "{path:?}");
        }
    }

    #[tokio::test]
    async fn owner_deleted_twice_reports_rows_once_per_tombstone() {
        let backend = scenario_backend();
        backend.insert_tombstone(
            SiloMode::Region,
            Tombstone::new(2u64, "auth_user", 100u64, ts(30)),
        );

        for path in [ReconcilePath::SameDatabase, ReconcilePath::CrossDatabase] {
            let result = reconcile_with_path(
                &backend,
                &relation(),
                ScanDirection::Row,
                &batch(0, 3),
                path,
            )
            .await
            .unwrap();
            assert_eq!(
                sorted(&result.row_ids),
                vec![RowId(1), RowId(1), RowId(3), RowId(3)],
                "{path:?}"
            );
            assert_eq!(result.oldest_seen, Some(ts(0)), "{path:?}");
        }
    }

    #[tokio::test]
    async fn nulled_rows_never_match() {
        let backend = scenario_backend();
        backend.insert_row("sentry_rule", RowId(1), "owner_user_id", None);

        let result = reconcile(&backend, &relation(), ScanDirection::Row, &batch(0, 3))
            .await
            .unwrap();
        assert_eq!(result.row_ids, vec![RowId(3)]);
    }

    #[tokio::test]
    async fn same_database_join_is_bounded_on_tombstones_for_tombstone_direction() {
        let backend = scenario_backend();
        backend.insert_tombstone(
            SiloMode::Region,
            Tombstone::new(5u64, "auth_user", 200u64, ts(10)),
        );

        let result = reconcile_with_path(
            &backend,
            &relation(),
            ScanDirection::Tombstone,
            &batch(1, 5),
            ReconcilePath::SameDatabase,
        )
        .await
        .unwrap();

        assert_eq!(result.row_ids, vec![RowId(2)]);
        assert_eq!(result.oldest_seen, Some(ts(10)));
    }

    fn arb_dataset() -> impl Strategy<Value = (Vec<(u64, Option<u64>)>, Vec<(u64, String, u64)>)> {
        let rows = prop::collection::btree_map(1u64..60, prop::option::of(0u64..12), 0..40)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>());
        let tombstones = prop::collection::btree_map(
            1u64..40,
            (prop_oneof![Just("auth_user".to_string()), Just("sentry_team".to_string())], 0u64..12),
            0..20,
        )
        .prop_map(|m| m.into_iter().map(|(id, (t, o))| (id, t, o)).collect::<Vec<_>>());
        (rows, tombstones)
    }

    proptest! {
        /// The join and the two-step lookup agree on the affected rows.
        #[test]
        fn paths_agree_on_affected_rows(
            (rows, tombstones) in arb_dataset(),
            low in 0u64..60,
            width in 0u64..60,
            direction in prop_oneof![Just(ScanDirection::Row), Just(ScanDirection::Tombstone)],
        ) {
            let backend = MemoryBackend::new();
            backend.create_table("sentry_rule");
            for (id, owner) in &rows {
                backend.insert_row("sentry_rule", RowId(*id), "owner_user_id", owner.map(ObjectId));
            }
            for (id, table, object) in &tombstones {
                backend.insert_tombstone(
                    SiloMode::Region,
                    Tombstone::new(*id, table.as_str(), *object, ts(*id as i64)),
                );
            }
            let window = batch(low, low + width);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (joined, two_step) = runtime.block_on(async {
                let joined = reconcile_with_path(
                    &backend, &relation(), direction, &window, ReconcilePath::SameDatabase,
                ).await.unwrap();
                let two_step = reconcile_with_path(
                    &backend, &relation(), direction, &window, ReconcilePath::CrossDatabase,
                ).await.unwrap();
                (joined, two_step)
            });

            let joined: BTreeSet<RowId> = joined.row_ids.into_iter().collect();
            let two_step: BTreeSet<RowId> = two_step.row_ids.into_iter().collect();
            prop_assert_eq!(joined, two_step);
        }
    }
}

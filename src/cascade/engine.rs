//! The cascade orchestrator.
//!
//! `CascadeEngine` runs one pass for one relation. Each direction goes
//! through the same steps:
//!
//! 1. **ComputeBatch**: plan `(low, up]` from the watermark and scoped MIN/MAX
//! 2. **Reconcile**: resolve affected rows, skipped for an empty window
//! 3. **Apply**: run the cascade policy on those rows
//! 4. **Decide**: commit the watermark at `up`, unless a chunked delete left
//!    rows behind, in which case the window is retried before moving on
//! 5. **Reschedule**: if work remains, enqueue the relation again after a
//!    fixed delay
//!
//! The engine holds no state between passes; everything that survives is the
//! watermark. Any error aborts the pass before the commit, so a retry
//! reprocesses the same window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use super::executor::{ApplyOutcome, CascadeExecutor, DEFAULT_DELETE_CHUNK_SIZE};
use super::reconcile::{Reconciliation, reconcile};
use super::window::{DEFAULT_BATCH_SIZE, plan_window, scoped_id_range};
use crate::backend::{BackendError, QueryBackend};
use crate::metrics::MetricsSink;
use crate::persistence::{WatermarkError, WatermarkStore};
use crate::registry::RelationRegistry;
use crate::types::{
    Batch, NotWeakReference, Relation, RelationKey, ScanDirection, SiloMode, WatermarkKey,
};
use crate::worker::{Job, JobQueue, QueueError};

/// Delay before a relation with remaining work is processed again.
pub const DEFAULT_RESCHEDULE_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("relation {0} is not registered")]
    UnknownRelation(RelationKey),

    #[error(transparent)]
    NotWeakReference(#[from] NotWeakReference),

    #[error("relation {relation} belongs to silo {expected}, not {requested}")]
    SiloMismatch {
        relation: RelationKey,
        expected: SiloMode,
        requested: SiloMode,
    },

    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl CascadeError {
    /// Whether the queue should redeliver the job later.
    ///
    /// Configuration problems are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CascadeError::UnknownRelation(_)
            | CascadeError::NotWeakReference(_)
            | CascadeError::SiloMismatch { .. } => false,
            CascadeError::Watermark(e) => e.is_retryable(),
            CascadeError::Backend(e) => e.is_retryable(),
            CascadeError::Queue(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct CascadeSettings {
    /// Maximum ids per window.
    pub batch_size: u64,

    /// Maximum rows removed per chunked delete call.
    pub delete_chunk_size: usize,

    /// Delay before a relation with remaining work runs again.
    pub reschedule_delay: Duration,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        CascadeSettings {
            batch_size: DEFAULT_BATCH_SIZE,
            delete_chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            reschedule_delay: DEFAULT_RESCHEDULE_DELAY,
        }
    }
}

/// Result of processing one direction of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionOutcome {
    pub direction: ScanDirection,
    pub batch: Batch,
    /// Row ids resolved by the reconciler, duplicates included.
    pub affected: usize,
    pub applied: ApplyOutcome,
    /// Whether the watermark was moved to `batch.up`.
    pub committed: bool,
    /// Whether this direction needs another invocation.
    pub has_more: bool,
}

/// Result of one top-level pass over a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub relation: RelationKey,
    /// Directions actually processed, in order. The row direction is absent
    /// when the tombstone direction short-circuited the pass.
    pub directions: Vec<DirectionOutcome>,
    pub rescheduled: bool,
}

/// Orchestrates cascade passes for registered relations.
pub struct CascadeEngine<B, W, Q, M> {
    registry: Arc<RelationRegistry>,
    backend: Arc<B>,
    store: Arc<W>,
    queue: Arc<Q>,
    metrics: Arc<M>,
    executor: CascadeExecutor,
    settings: CascadeSettings,
}

impl<B, W, Q, M> CascadeEngine<B, W, Q, M>
where
    B: QueryBackend,
    W: WatermarkStore,
    Q: JobQueue,
    M: MetricsSink,
{
    pub fn new(
        registry: Arc<RelationRegistry>,
        backend: Arc<B>,
        store: Arc<W>,
        queue: Arc<Q>,
        metrics: Arc<M>,
        settings: CascadeSettings,
    ) -> Self {
        CascadeEngine {
            registry,
            backend,
            store,
            queue,
            metrics,
            executor: CascadeExecutor::new(settings.delete_chunk_size),
            settings,
        }
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    /// Runs one pass over `key`: the tombstone direction, then the row
    /// direction.
    ///
    /// If the tombstone direction still has work the row direction is skipped
    /// and the relation is rescheduled; the row side is picked up by a later
    /// pass once the tombstone side has drained. Under a sustained tombstone
    /// backlog this starves the row side.
    #[instrument(skip(self), fields(relation = %key, silo = %silo))]
    pub async fn process_relation(&self, key: &RelationKey, silo: SiloMode) -> Result<PassOutcome> {
        let result = self.run_pass(key, silo).await;
        if let Err(e) = &result {
            error!(
                relation = %key,
                silo = %silo,
                retryable = e.is_retryable(),
                error = %e,
                "Cascade pass failed"
            );
        }
        result
    }

    async fn run_pass(&self, key: &RelationKey, silo: SiloMode) -> Result<PassOutcome> {
        let relation = self.resolve(key, silo)?;

        let mut directions = Vec::with_capacity(ScanDirection::PASS_ORDER.len());
        for direction in ScanDirection::PASS_ORDER {
            let outcome = self.process_direction(relation, direction).await?;
            let has_more = outcome.has_more;
            directions.push(outcome);

            if has_more {
                self.queue.enqueue(
                    Job::process_relation(key.clone(), silo),
                    Some(self.settings.reschedule_delay),
                )?;
                info!(
                    %direction,
                    delay_secs = self.settings.reschedule_delay.as_secs(),
                    "More work remains, rescheduled"
                );
                return Ok(PassOutcome {
                    relation: key.clone(),
                    directions,
                    rescheduled: true,
                });
            }
        }

        Ok(PassOutcome {
            relation: key.clone(),
            directions,
            rescheduled: false,
        })
    }

    /// Looks up a relation and checks that it may be processed by `silo`.
    fn resolve(&self, key: &RelationKey, silo: SiloMode) -> Result<&Relation> {
        let relation = self
            .registry
            .get(key)
            .ok_or_else(|| CascadeError::UnknownRelation(key.clone()))?;
        relation.ensure_weak_reference()?;
        if relation.silo != silo {
            return Err(CascadeError::SiloMismatch {
                relation: key.clone(),
                expected: relation.silo,
                requested: silo,
            });
        }
        Ok(relation)
    }

    /// Processes one window of one direction. Does not reschedule.
    pub async fn process_direction(
        &self,
        relation: &Relation,
        direction: ScanDirection,
    ) -> Result<DirectionOutcome> {
        let relation_key = relation.key();
        let key = WatermarkKey::new(direction, relation_key.clone());

        // 1. ComputeBatch
        let watermark = self.store.get(&key).await?;
        let committed_low = watermark.low;
        let range = scoped_id_range(self.backend.as_ref(), relation, direction).await?;
        let window = plan_window(watermark, range, self.settings.batch_size);
        self.metrics
            .watermark_gap(&relation_key, direction, window.gap);
        let batch = window.batch;

        // 2. Reconcile
        let reconciliation = if batch.is_empty() {
            Reconciliation::default()
        } else {
            reconcile(self.backend.as_ref(), relation, direction, &batch).await?
        };
        if let Some(oldest) = reconciliation.oldest_seen {
            let lag = (Utc::now() - oldest).to_std().unwrap_or_default();
            self.metrics.processing_lag(&relation_key, direction, lag);
        }

        // 3. Apply
        let applied = self
            .executor
            .apply(
                self.backend.as_ref(),
                relation,
                &reconciliation.row_ids,
                &batch.transaction_id,
            )
            .await?;

        // 4. Decide
        let committed = applied.is_complete() && batch.up > committed_low;
        if committed {
            self.store
                .set(&key, batch.up, &batch.transaction_id)
                .await?;
        }
        let has_more = batch.has_more || !applied.is_complete();

        debug!(
            watermark = %key,
            low = batch.low,
            up = batch.up,
            affected = reconciliation.row_ids.len(),
            ?applied,
            committed,
            has_more,
            "Processed window"
        );

        Ok(DirectionOutcome {
            direction,
            affected: reconciliation.row_ids.len(),
            applied,
            committed,
            has_more,
            batch,
        })
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

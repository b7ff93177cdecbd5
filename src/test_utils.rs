//! Shared test doubles and generators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tokio::sync::Barrier;

use crate::backend::MemoryBackend;
use crate::cascade::{CascadeEngine, CascadeSettings};
use crate::metrics::MetricsSink;
use crate::persistence::{MemoryWatermarkStore, WatermarkError, WatermarkStore};
use crate::registry::RelationRegistry;
use crate::types::{
    CascadePolicy, Relation, RelationKey, ScanDirection, SiloMode, Watermark, WatermarkKey,
};
use crate::worker::{Job, JobQueue, QueueError, QueuedJob};

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// `sentry_rule.owner_user_id -> auth_user` in the region silo.
pub fn rule_owner(policy: CascadePolicy) -> Relation {
    Relation::new(
        "sentry_rule",
        "owner_user_id",
        "auth_user",
        policy,
        SiloMode::Region,
    )
}

pub fn arb_policy() -> impl Strategy<Value = CascadePolicy> {
    prop_oneof![
        Just(CascadePolicy::Delete),
        Just(CascadePolicy::SetNull),
        Just(CascadePolicy::Ignore),
    ]
}

/// Queue that records every enqueue instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<(QueuedJob, Option<Duration>)>>,
    closed: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<(QueuedJob, Option<Duration>)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<(QueuedJob, Option<Duration>)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    /// Makes subsequent enqueues fail with `QueueError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl JobQueue for RecordingQueue {
    fn enqueue_attempt(
        &self,
        job: Job,
        attempt: u32,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.jobs
            .lock()
            .unwrap()
            .push((QueuedJob::with_attempt(job, attempt), delay));
        Ok(())
    }
}

/// Metrics sink that keeps every sample.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub gaps: Mutex<Vec<(RelationKey, ScanDirection, u64)>>,
    pub lags: Mutex<Vec<(RelationKey, ScanDirection, Duration)>>,
}

impl RecordingMetrics {
    pub fn gaps(&self) -> Vec<(RelationKey, ScanDirection, u64)> {
        self.gaps.lock().unwrap().clone()
    }

    pub fn lags(&self) -> Vec<(RelationKey, ScanDirection, Duration)> {
        self.lags.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn watermark_gap(&self, relation: &RelationKey, direction: ScanDirection, gap: u64) {
        self.gaps
            .lock()
            .unwrap()
            .push((relation.clone(), direction, gap));
    }

    fn processing_lag(&self, relation: &RelationKey, direction: ScanDirection, lag: Duration) {
        self.lags
            .lock()
            .unwrap()
            .push((relation.clone(), direction, lag));
    }
}

/// Memory store whose writes can be made to fail, and whose reads can be
/// held until several callers have arrived.
#[derive(Debug, Default)]
pub struct FlakyWatermarkStore {
    pub inner: MemoryWatermarkStore,
    fail_sets: AtomicBool,
    read_gate: Mutex<Option<Arc<Barrier>>>,
}

impl FlakyWatermarkStore {
    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    /// Makes every `get` wait until `callers` reads are in flight.
    pub fn gate_reads(&self, callers: usize) {
        *self.read_gate.lock().unwrap() = Some(Arc::new(Barrier::new(callers)));
    }
}

impl WatermarkStore for FlakyWatermarkStore {
    async fn get(&self, key: &WatermarkKey) -> Result<Watermark, WatermarkError> {
        let watermark = self.inner.get(key).await?;
        let gate = self.read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        Ok(watermark)
    }

    async fn set(
        &self,
        key: &WatermarkKey,
        low: u64,
        transaction_id: &str,
    ) -> Result<(), WatermarkError> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(WatermarkError::Unavailable("injected failure".to_string()));
        }
        self.inner.set(key, low, transaction_id).await
    }

    async fn reset(&self, key: &WatermarkKey) -> Result<Watermark, WatermarkError> {
        self.inner.reset(key).await
    }
}

pub type TestEngine =
    CascadeEngine<MemoryBackend, FlakyWatermarkStore, RecordingQueue, RecordingMetrics>;

/// An engine wired to in-memory collaborators, with handles to each.
pub struct Harness {
    pub engine: Arc<TestEngine>,
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<FlakyWatermarkStore>,
    pub queue: Arc<RecordingQueue>,
    pub metrics: Arc<RecordingMetrics>,
}

impl Harness {
    pub fn new(relations: Vec<Relation>, settings: CascadeSettings) -> Self {
        Self::from_parts(
            RelationRegistry::new(relations).unwrap(),
            MemoryBackend::new(),
            settings,
        )
    }

    pub fn from_parts(
        registry: RelationRegistry,
        backend: MemoryBackend,
        settings: CascadeSettings,
    ) -> Self {
        backend.provision(&registry);
        let registry = Arc::new(registry);
        let backend = Arc::new(backend);
        let store = Arc::new(FlakyWatermarkStore::default());
        let queue = Arc::new(RecordingQueue::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let engine = Arc::new(CascadeEngine::new(
            registry,
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&metrics),
            settings,
        ));
        Harness {
            engine,
            backend,
            store,
            queue,
            metrics,
        }
    }

    /// Committed watermark, without creating it.
    pub fn low(&self, direction: ScanDirection, relation: &Relation) -> Option<u64> {
        self.store
            .inner
            .peek(&WatermarkKey::new(direction, relation.key()))
            .map(|w| w.low)
    }
}

//! Best-effort metrics.
//!
//! Metrics are advisory: a sink must never fail an invocation, so the trait
//! has no error channel. The default sink emits structured `tracing` events,
//! which an OpenTelemetry or statsd layer can pick up downstream.

use std::time::Duration;

use tracing::debug;

use crate::types::{RelationKey, ScanDirection};

/// Gauge name for the distance between a watermark and the table's max id.
pub const WATERMARK_GAP: &str = "cascade.watermark.gap";

/// Gauge name for the age of the oldest tombstone seen in a batch.
pub const PROCESSING_LAG: &str = "cascade.processing_lag_seconds";

/// Receives gauges from the orchestrator.
pub trait MetricsSink: Send + Sync {
    /// Records how many ids remain above the watermark.
    fn watermark_gap(&self, relation: &RelationKey, direction: ScanDirection, gap: u64);

    /// Records how long ago the oldest tombstone in the batch was written.
    fn processing_lag(&self, relation: &RelationKey, direction: ScanDirection, lag: Duration);
}

/// Emits metrics as `tracing` debug events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn watermark_gap(&self, relation: &RelationKey, direction: ScanDirection, gap: u64) {
        debug!(metric = WATERMARK_GAP, relation = %relation, %direction, value = gap);
    }

    fn processing_lag(&self, relation: &RelationKey, direction: ScanDirection, lag: Duration) {
        debug!(
            metric = PROCESSING_LAG,
            relation = %relation,
            %direction,
            value = lag.as_secs_f64()
        );
    }
}

//! Batch window calculation.
//!
//! A window is the `(low, up]` slice of ids one invocation handles. It starts
//! at the committed watermark, fast-forwarded past ids that no longer exist,
//! and is capped at `batch_size` ids so a single invocation stays well inside
//! ordinary queue deadlines.

use crate::backend::{IdRange, QueryBackend, Result};
use crate::types::{Batch, Relation, ScanDirection, Watermark};

/// Default maximum number of ids per window.
pub const DEFAULT_BATCH_SIZE: u64 = 500;

/// A planned window plus the gap metric computed alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWindow {
    pub batch: Batch,
    /// `max(max_id - low, 0)`; zero for an empty table.
    pub gap: u64,
}

/// Plans the next window from a persisted watermark and the scoped id range.
///
/// - `low = max(persisted_low, min_id - 1)`
/// - `up = min(max_id, low + batch_size)`
/// - `has_more = up < max_id`
///
/// An empty table yields `low = up = 0` with nothing more to do. When the
/// watermark is already past `max_id` the window comes out inverted
/// (`low > up`); callers treat that as empty.
pub fn plan_window(watermark: Watermark, range: Option<IdRange>, batch_size: u64) -> BatchWindow {
    let Some(range) = range else {
        return BatchWindow {
            batch: Batch {
                low: 0,
                up: 0,
                has_more: false,
                transaction_id: watermark.transaction_id,
            },
            gap: 0,
        };
    };

    let low = watermark.low.max(range.min.saturating_sub(1));
    let up = range.max.min(low.saturating_add(batch_size));
    BatchWindow {
        batch: Batch {
            low,
            up,
            has_more: up < range.max,
            transaction_id: watermark.transaction_id,
        },
        gap: range.max.saturating_sub(low),
    }
}

/// Fetches the scoped MIN/MAX id for `direction`.
///
/// Rows are scoped to the referencing table; tombstones to those recorded
/// against the relation's owning table.
pub async fn scoped_id_range<B: QueryBackend>(
    backend: &B,
    relation: &Relation,
    direction: ScanDirection,
) -> Result<Option<IdRange>> {
    match direction {
        ScanDirection::Row => backend.row_id_range(&relation.referencing_table).await,
        ScanDirection::Tombstone => {
            backend
                .tombstone_id_range(relation.tombstone_table(), &relation.owning_table)
                .await
        }
    }
}

//! Watermarks, scan directions and batch windows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::ids::RelationKey;

/// Which side of the relation a watermark walks.
///
/// A tombstone can be written before or after the row that points at it, so
/// each relation keeps one cursor over its referencing rows and one over the
/// tombstones of its owning table. Walking only one side would permanently
/// miss the cascades whose other side arrived later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// Bounded on the referencing table's ids.
    Row,
    /// Bounded on the tombstone table's ids.
    Tombstone,
}

impl ScanDirection {
    /// Order in which a single pass visits the directions.
    pub const PASS_ORDER: [ScanDirection; 2] = [ScanDirection::Tombstone, ScanDirection::Row];

    /// Prefix used in watermark keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDirection::Row => "row",
            ScanDirection::Tombstone => "tombstone",
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scan direction {0:?}: expected `row` or `tombstone`")]
pub struct UnknownScanDirection(pub String);

impl FromStr for ScanDirection {
    type Err = UnknownScanDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "row" => Ok(ScanDirection::Row),
            "tombstone" => Ok(ScanDirection::Tombstone),
            _ => Err(UnknownScanDirection(s.to_string())),
        }
    }
}

/// Key of a persisted watermark: `{direction}.{table}.{field}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatermarkKey {
    pub direction: ScanDirection,
    pub relation: RelationKey,
}

impl WatermarkKey {
    pub fn new(direction: ScanDirection, relation: RelationKey) -> Self {
        WatermarkKey {
            direction,
            relation,
        }
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.direction, self.relation)
    }
}

/// Persisted progress cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Highest id (exclusive lower bound of the next window) fully processed.
    pub low: u64,

    /// Opaque token identifying the current run of this cursor. Rotated on
    /// reset so that work keyed by the old token is not confused with new work.
    pub transaction_id: String,
}

impl Watermark {
    /// A fresh cursor at zero with a new random token.
    pub fn initial() -> Self {
        Watermark {
            low: 0,
            transaction_id: fresh_transaction_id(),
        }
    }
}

/// Generates a new random transaction token.
pub fn fresh_transaction_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The `(low, up]` id range handled by one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub low: u64,
    pub up: u64,
    /// Whether ids above `up` remain in the scanned table.
    pub has_more: bool,
    pub transaction_id: String,
}

impl Batch {
    /// True when the window contains no ids, so reconciliation is skipped.
    pub fn is_empty(&self) -> bool {
        self.low >= self.up
    }

    /// Width of the window; zero when empty.
    pub fn width(&self) -> u64 {
        self.up.saturating_sub(self.low)
    }
}

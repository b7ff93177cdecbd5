//! Applies a relation's cascade policy to resolved rows.
//!
//! Every policy is idempotent: deleting an absent row and nulling an already
//! null field are both no-ops, so re-applying the same id set after a crash or
//! a concurrent invocation changes nothing.

use tracing::debug;

use crate::backend::{QueryBackend, Result};
use crate::types::{CascadePolicy, Relation, RowId};

/// Default number of rows removed per chunked delete call.
pub const DEFAULT_DELETE_CHUNK_SIZE: usize = 100;

/// Whether the policy was fully applied to the id set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Complete,
    /// Chunked deletion left rows behind; the same window must be applied
    /// again before the watermark may move past it.
    ChunksRemaining,
}

impl ApplyOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ApplyOutcome::Complete)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CascadeExecutor {
    delete_chunk_size: usize,
}

impl Default for CascadeExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_DELETE_CHUNK_SIZE)
    }
}

impl CascadeExecutor {
    pub fn new(delete_chunk_size: usize) -> Self {
        CascadeExecutor {
            delete_chunk_size: delete_chunk_size.max(1),
        }
    }

    /// Applies `relation.policy` to `ids`. Duplicate or missing ids are fine.
    pub async fn apply<B: QueryBackend>(
        &self,
        backend: &B,
        relation: &Relation,
        ids: &[RowId],
        transaction_id: &str,
    ) -> Result<ApplyOutcome> {
        if ids.is_empty() {
            return Ok(ApplyOutcome::Complete);
        }

        match relation.policy {
            CascadePolicy::Delete => {
                let has_more = backend
                    .delete_chunk(
                        &relation.referencing_table,
                        ids,
                        transaction_id,
                        self.delete_chunk_size,
                    )
                    .await?;
                debug!(
                    relation = %relation.key(),
                    candidates = ids.len(),
                    has_more,
                    "Applied cascading delete"
                );
                Ok(if has_more {
                    ApplyOutcome::ChunksRemaining
                } else {
                    ApplyOutcome::Complete
                })
            }
            CascadePolicy::SetNull => {
                let updated = backend
                    .null_out(&relation.referencing_table, &relation.field, ids)
                    .await?;
                debug!(
                    relation = %relation.key(),
                    candidates = ids.len(),
                    updated,
                    "Nulled weak references"
                );
                Ok(ApplyOutcome::Complete)
            }
            CascadePolicy::Ignore => Ok(ApplyOutcome::Complete),
        }
    }
}

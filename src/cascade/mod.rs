//! Cascade engine for weak-reference relations.
//!
//! A relation is processed in passes. Each pass walks one bounded window per
//! scan direction, resolves which referencing rows point at tombstoned owners,
//! applies the relation's policy, and commits the direction's watermark.
//!
//! # Architecture
//!
//! The engine is split the same way each window flows through it:
//! - [`window`] plans the `(low, up]` slice from the watermark and MIN/MAX ids
//! - [`reconcile`] finds the affected rows, by join or by two-step lookup
//! - [`executor`] applies DELETE, SET_NULL or IGNORE
//! - [`engine`] sequences the directions, commits and reschedules
//!
//! # Key Invariants
//!
//! 1. **Monotonic progress**: a watermark only moves forward, and only after
//!    the policy has been fully applied to its window.
//!
//! 2. **Idempotence**: re-running a window after a crash or alongside another
//!    invocation changes nothing the first run did not already change.
//!
//! 3. **Pass order**: the tombstone direction runs before the row direction,
//!    and a tombstone backlog defers the row direction to a later pass.

pub mod engine;
pub mod executor;
pub mod reconcile;
pub mod window;

pub use engine::{
    CascadeEngine, CascadeError, CascadeSettings, DEFAULT_RESCHEDULE_DELAY, DirectionOutcome,
    PassOutcome,
};
pub use executor::{ApplyOutcome, CascadeExecutor, DEFAULT_DELETE_CHUNK_SIZE};
pub use reconcile::{ReconcilePath, Reconciliation, choose_path, reconcile};
pub use window::{BatchWindow, DEFAULT_BATCH_SIZE, plan_window};

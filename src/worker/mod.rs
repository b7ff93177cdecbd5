//! Job queue and worker.
//!
//! Work reaches the cascade engine as jobs on a tokio channel. A trigger task
//! per silo enqueues `ScheduleAll` on a fixed interval, the enumerator fans it
//! out into one `ProcessRelation` per relation, and passes with remaining
//! work enqueue themselves again after a delay.
//!
//! # Module Structure
//!
//! - [`message`]: job types
//! - [`queue`]: enqueue-with-delay over an mpsc channel
//! - [`enumerator`]: `ScheduleAll` handling and the kill switch check
//! - [`trigger`]: periodic `ScheduleAll` per silo
//! - [`retry`]: backoff for transient failures
//! - [`worker`]: the dispatch loop

mod enumerator;
mod message;
mod queue;
mod retry;
mod trigger;
mod worker;

pub use enumerator::{ScheduleSummary, schedule_all};
pub use message::{Job, QueuedJob};
pub use queue::{JobQueue, QueueError, TokioJobQueue};
pub use retry::RetryConfig;
pub use trigger::{TriggerConfig, run_trigger};
pub use worker::{CascadeWorker, JobOutcome};

//! Job queue with delayed enqueue.
//!
//! Enqueueing never blocks. A delayed job is held by a tokio timer task and
//! delivered to the worker channel when the delay elapses; if the worker has
//! shut down by then the job is dropped, which is safe because the periodic
//! `ScheduleAll` trigger re-enqueues every relation anyway.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::message::{Job, QueuedJob};

#[derive(Debug, Error)]
pub enum QueueError {
    /// The receiving worker has gone away.
    #[error("job queue closed")]
    Closed,

    /// Delayed enqueue needs a tokio runtime to host the timer.
    #[error("no tokio runtime available for delayed enqueue")]
    NoRuntime,
}

/// The enqueue side of the job queue.
pub trait JobQueue: Send + Sync {
    /// Enqueues `job` as delivery attempt `attempt`, optionally after `delay`.
    fn enqueue_attempt(
        &self,
        job: Job,
        attempt: u32,
        delay: Option<Duration>,
    ) -> Result<(), QueueError>;

    /// Enqueues a fresh job.
    fn enqueue(&self, job: Job, delay: Option<Duration>) -> Result<(), QueueError> {
        self.enqueue_attempt(job, 0, delay)
    }
}

/// Queue backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct TokioJobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl TokioJobQueue {
    /// Creates a queue and the receiver the worker consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TokioJobQueue { tx }, rx)
    }
}

impl JobQueue for TokioJobQueue {
    fn enqueue_attempt(
        &self,
        job: Job,
        attempt: u32,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let queued = QueuedJob::with_attempt(job, attempt);
        match delay {
            None | Some(Duration::ZERO) => {
                trace!(job = %queued.job, attempt, "Enqueued job");
                self.tx.send(queued).map_err(|_| QueueError::Closed)
            }
            Some(delay) => {
                if self.tx.is_closed() {
                    return Err(QueueError::Closed);
                }
                let handle =
                    tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
                trace!(job = %queued.job, attempt, ?delay, "Enqueued delayed job");
                let tx = self.tx.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(mpsc::error::SendError(job)) = tx.send(queued) {
                        debug!(job = %job.job, "Dropped delayed job: queue closed");
                    }
                });
                Ok(())
            }
        }
    }
}

//! The job worker.
//!
//! A single worker consumes the job channel and dispatches each job:
//!
//! - `ScheduleAll` walks the registry through the enumerator
//! - `ProcessRelation` runs one cascade pass
//!
//! Jobs run one at a time. A pass that fails with a retryable error is
//! redelivered with exponential backoff; anything else is logged and dropped,
//! and the next `ScheduleAll` picks the relation up again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::enumerator::{ScheduleSummary, schedule_all};
use super::message::{Job, QueuedJob};
use super::queue::JobQueue;
use super::retry::RetryConfig;
use crate::backend::QueryBackend;
use crate::cascade::{CascadeEngine, PassOutcome};
use crate::config::KillSwitch;
use crate::metrics::MetricsSink;
use crate::persistence::WatermarkStore;

/// What handling one job led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Scheduled(ScheduleSummary),
    Processed(PassOutcome),
    /// The pass failed transiently and was re-enqueued.
    Retrying { attempt: u32, delay: Duration },
    /// The pass failed and will not be redelivered.
    Dropped,
}

pub struct CascadeWorker<B, W, Q, M> {
    engine: Arc<CascadeEngine<B, W, Q, M>>,
    queue: Arc<Q>,
    kill_switch: KillSwitch,
    retry: RetryConfig,
}

impl<B, W, Q, M> CascadeWorker<B, W, Q, M>
where
    B: QueryBackend,
    W: WatermarkStore,
    Q: JobQueue,
    M: MetricsSink,
{
    pub fn new(
        engine: Arc<CascadeEngine<B, W, Q, M>>,
        queue: Arc<Q>,
        kill_switch: KillSwitch,
        retry: RetryConfig,
    ) -> Self {
        CascadeWorker {
            engine,
            queue,
            kill_switch,
            retry,
        }
    }

    /// Runs the worker loop until `shutdown` fires or every sender is gone.
    ///
    /// A job in progress when shutdown fires runs to completion first.
    #[instrument(skip_all)]
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedJob>, shutdown: CancellationToken) {
        info!("Worker loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }

                queued = rx.recv() => {
                    match queued {
                        Some(queued) => {
                            self.handle(queued).await;
                        }
                        None => {
                            info!("Job channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Worker loop stopped");
    }

    /// Handles one delivery.
    #[instrument(skip(self), fields(job = %queued.job, attempt = queued.attempt))]
    pub async fn handle(&self, queued: QueuedJob) -> JobOutcome {
        let QueuedJob { job, attempt } = queued;
        match &job {
            Job::ScheduleAll { silo } => JobOutcome::Scheduled(schedule_all(
                self.engine.registry(),
                self.queue.as_ref(),
                &self.kill_switch,
                *silo,
            )),
            Job::ProcessRelation { relation, silo } => {
                match self.engine.process_relation(relation, *silo).await {
                    Ok(outcome) => {
                        debug!(rescheduled = outcome.rescheduled, "Pass complete");
                        JobOutcome::Processed(outcome)
                    }
                    Err(e) if e.is_retryable() => self.redeliver(job.clone(), attempt),
                    Err(e) => {
                        error!(error = %e, "Dropping job after non-retryable error");
                        JobOutcome::Dropped
                    }
                }
            }
        }
    }

    fn redeliver(&self, job: Job, attempt: u32) -> JobOutcome {
        let Some(delay) = self.retry.next_delay(attempt) else {
            error!(
                attempts = attempt + 1,
                "Dropping job after exhausting retries"
            );
            return JobOutcome::Dropped;
        };

        let next = attempt + 1;
        match self.queue.enqueue_attempt(job, next, Some(delay)) {
            Ok(()) => {
                warn!(
                    next_attempt = next,
                    delay_secs = delay.as_secs_f64(),
                    "Transient failure, job redelivery scheduled"
                );
                JobOutcome::Retrying {
                    attempt: next,
                    delay,
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to redeliver job");
                JobOutcome::Dropped
            }
        }
    }
}

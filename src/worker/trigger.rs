//! Periodic `ScheduleAll` trigger.
//!
//! One trigger task runs per silo mode this process serves. Each fires on a
//! fixed interval (1 minute by default). The first firing is staggered by a
//! hash of the silo name so that several silos, or several processes
//! restarting together, do not all enumerate at the same instant.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::message::Job;
use super::queue::{JobQueue, QueueError};
use crate::types::SiloMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub interval: Duration,
}

impl TriggerConfig {
    pub fn new(interval: Duration) -> Self {
        TriggerConfig { interval }
    }

    /// Delay before the first trigger for `silo`.
    ///
    /// `hash(silo) % (interval / 2)`
    pub fn initial_delay(&self, silo: SiloMode) -> Duration {
        let mut hasher = std::hash::DefaultHasher::new();
        silo.as_str().hash(&mut hasher);
        let max_delay_ms = (self.interval.as_millis() / 2).max(1) as u64;
        Duration::from_millis(hasher.finish() % max_delay_ms)
    }
}

/// Enqueues `ScheduleAll(silo)` every interval until `shutdown` fires or the
/// queue closes.
#[instrument(skip(queue, config, shutdown), fields(silo = %silo))]
pub async fn run_trigger<Q: JobQueue>(
    queue: Arc<Q>,
    silo: SiloMode,
    config: TriggerConfig,
    shutdown: CancellationToken,
) {
    let first = Instant::now() + config.initial_delay(silo);
    let mut ticker = tokio::time::interval_at(first, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        interval_secs = config.interval.as_secs(),
        "Schedule trigger started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Shutdown signal received, stopping trigger");
                break;
            }
            _ = ticker.tick() => {
                match queue.enqueue(Job::schedule_all(silo), None) {
                    Ok(()) => debug!("Enqueued schedule"),
                    Err(QueueError::Closed) => {
                        info!("Job queue closed, stopping trigger");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Failed to enqueue schedule"),
                }
            }
        }
    }
}

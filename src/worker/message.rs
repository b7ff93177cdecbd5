//! Jobs carried by the queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{RelationKey, SiloMode};

/// A unit of work dispatched by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Walk the registry and enqueue one `ProcessRelation` per relation with
    /// affinity to `silo`. Fired on a fixed interval per silo mode.
    ScheduleAll { silo: SiloMode },

    /// Run one cascade pass for a relation. Enqueued by `ScheduleAll` and by
    /// the pass itself when more work remains.
    ProcessRelation { relation: RelationKey, silo: SiloMode },
}

impl Job {
    pub fn schedule_all(silo: SiloMode) -> Self {
        Job::ScheduleAll { silo }
    }

    pub fn process_relation(relation: RelationKey, silo: SiloMode) -> Self {
        Job::ProcessRelation { relation, silo }
    }

    pub fn silo(&self) -> SiloMode {
        match self {
            Job::ScheduleAll { silo } | Job::ProcessRelation { silo, .. } => *silo,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::ScheduleAll { silo } => write!(f, "schedule_all({silo})"),
            Job::ProcessRelation { relation, silo } => {
                write!(f, "process_relation({relation}, {silo})")
            }
        }
    }
}

/// A job together with its delivery attempt number.
///
/// `attempt` is zero for fresh jobs, including self-reschedules; only
/// queue-level retries after a transient failure increment it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: Job,
    pub attempt: u32,
}

impl QueuedJob {
    pub fn new(job: Job) -> Self {
        QueuedJob { job, attempt: 0 }
    }

    pub fn with_attempt(job: Job, attempt: u32) -> Self {
        QueuedJob { job, attempt }
    }
}

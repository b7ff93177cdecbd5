//! `ScheduleAll` handling: fan a silo's relations out into jobs.

use tracing::{error, info, instrument, warn};

use super::message::Job;
use super::queue::JobQueue;
use crate::config::KillSwitch;
use crate::registry::RelationRegistry;
use crate::types::SiloMode;

/// What one `ScheduleAll` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub enqueued: usize,
    /// Relations rejected as misconfigured or whose enqueue failed.
    pub skipped: usize,
    /// Whether the kill switch suppressed the whole run.
    pub disabled: bool,
}

/// Enqueues one undelayed `ProcessRelation` per relation with affinity to
/// `silo`.
///
/// A bad relation or a failed enqueue is logged and skipped; the walk always
/// finishes. With the kill switch engaged nothing is enqueued.
#[instrument(skip(registry, queue, kill_switch), fields(silo = %silo))]
pub fn schedule_all<Q: JobQueue + ?Sized>(
    registry: &RelationRegistry,
    queue: &Q,
    kill_switch: &KillSwitch,
    silo: SiloMode,
) -> ScheduleSummary {
    if kill_switch.is_engaged() {
        info!("Kill switch engaged, skipping schedule");
        return ScheduleSummary {
            disabled: true,
            ..ScheduleSummary::default()
        };
    }

    let mut summary = ScheduleSummary::default();
    for relation in registry.for_silo(silo) {
        if let Err(e) = relation.ensure_weak_reference() {
            error!(relation = %relation.key(), silo = %silo, error = %e, "Skipping misconfigured relation");
            summary.skipped += 1;
            continue;
        }

        match queue.enqueue(Job::process_relation(relation.key(), silo), None) {
            Ok(()) => summary.enqueued += 1,
            Err(e) => {
                warn!(relation = %relation.key(), silo = %silo, error = %e, "Failed to enqueue relation");
                summary.skipped += 1;
            }
        }
    }

    info!(
        enqueued = summary.enqueued,
        skipped = summary.skipped,
        "Scheduled relations"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingQueue, rule_owner};
    use crate::types::{CascadePolicy, FieldKind, Relation};
    use crate::worker::QueuedJob;

    fn registry() -> RelationRegistry {
        let mut fk = Relation::new(
            "sentry_monitor",
            "owner_team_id",
            "sentry_team",
            CascadePolicy::SetNull,
            SiloMode::Region,
        );
        fk.field_kind = FieldKind::ForeignKey;
        RelationRegistry::new(vec![
            rule_owner(CascadePolicy::Delete),
            fk,
            Relation::new(
                "sentry_orgmember",
                "user_id",
                "auth_user",
                CascadePolicy::Delete,
                SiloMode::Region,
            ),
            Relation::new(
                "sentry_useremail",
                "organization_id",
                "sentry_organization",
                CascadePolicy::Ignore,
                SiloMode::Control,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn enqueues_relations_of_requested_silo() {
        let queue = RecordingQueue::new();
        let summary = schedule_all(&registry(), &queue, &KillSwitch::default(), SiloMode::Region);

        assert_eq!(
            summary,
            ScheduleSummary {
                enqueued: 2,
                skipped: 1,
                disabled: false
            }
        );
        assert_eq!(
            queue.jobs(),
            vec![
                (
                    QueuedJob::new(Job::process_relation(
                        rule_owner(CascadePolicy::Delete).key(),
                        SiloMode::Region
                    )),
                    None
                ),
                (
                    QueuedJob::new(Job::process_relation(
                        "sentry_orgmember.user_id".parse().unwrap(),
                        SiloMode::Region
                    )),
                    None
                ),
            ]
        );
    }

    #[test]
    fn control_silo_only_sees_control_relations() {
        let queue = RecordingQueue::new();
        let summary = schedule_all(&registry(), &queue, &KillSwitch::default(), SiloMode::Control);

        assert_eq!(summary.enqueued, 1);
        assert_eq!(queue.jobs()[0].0.job.silo(), SiloMode::Control);
    }

    #[test]
    fn kill_switch_makes_schedule_a_no_op() {
        let queue = RecordingQueue::new();
        let summary = schedule_all(&registry(), &queue, &KillSwitch::new(true), SiloMode::Region);

        assert!(summary.disabled);
        assert_eq!(summary.enqueued, 0);
        assert!(queue.jobs().is_empty());
    }

    #[test]
    fn enqueue_failures_do_not_abort_the_walk() {
        let queue = RecordingQueue::new();
        queue.close();
        let summary = schedule_all(&registry(), &queue, &KillSwitch::default(), SiloMode::Region);

        assert_eq!(summary.enqueued, 0);
        assert_eq!(summary.skipped, 3);
    }
}

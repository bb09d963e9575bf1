//! Automated run driver: one sweep over every schedule that needs work.
//!
//! A sweep has four phases:
//!
//! 1. promote PENDING/SENT schedules whose timer has passed (to DUE or DONE);
//! 2. repair ESCALATED schedules the subscribers left behind: open a call
//!    when the escalation has none, resume the schedule when its call was
//!    already resolved;
//! 3. list DUE schedules whose timer has passed, up to the batch limit;
//! 4. process them on up to `max_concurrent` threads. For each schedule:
//!    claim, re-check eligibility, send, publish `ContactAttempted` and
//!    advance. Pending calls for escalations are opened by the
//!    `StepAdvanced` subscriber, not here.
//!
//! Sweeps may overlap (several processes, or a slow sweep still running when
//! the next one starts). The repository claim is the only guard: a schedule
//! that cannot be claimed belongs to someone else and is skipped. Claims are
//! stamped when they are taken, not when the sweep started.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use notifyflow_core::ScheduleId;
use notifyflow_events::EventDispatcher;
use notifyflow_outreach::{
    ContactSchedule, FailureKind, OutreachEvent, ScheduleStatus, StepOutcome,
};

use crate::clock::Clock;
use crate::config::NotificationSettings;
use crate::error::{NotificationError, NotificationResult};
use crate::repos::{ContactScheduleRepo, InstallmentRepo, ScheduleFilter};
use crate::services::{ContactSchedulingService, NotificationSenderService, PendingCallTracker};

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    /// PENDING/SENT schedules moved on by elapsed time.
    pub promoted: usize,
    /// DUE schedules found for processing.
    pub due: usize,
    /// Claimed by another worker (or no longer due) and skipped.
    pub skipped: usize,
    pub sent: usize,
    /// Transient failure, will be retried.
    pub retried: usize,
    pub escalated: usize,
    /// Cancelled because nothing is overdue any more.
    pub cancelled: usize,
    /// Finished the flow during this sweep.
    pub completed: usize,
    /// Escalated schedules found without a pending call, now given one.
    pub calls_reopened: usize,
    /// Escalated schedules whose call was done, resumed by the sweep.
    pub resumed: usize,
    pub errors: usize,
}

impl SweepReport {
    fn merge(mut self, other: SweepReport) -> Self {
        self.promoted += other.promoted;
        self.due += other.due;
        self.skipped += other.skipped;
        self.sent += other.sent;
        self.retried += other.retried;
        self.escalated += other.escalated;
        self.cancelled += other.cancelled;
        self.completed += other.completed;
        self.calls_reopened += other.calls_reopened;
        self.resumed += other.resumed;
        self.errors += other.errors;
        self
    }
}

pub struct AutomatedRunDriver {
    schedules: Arc<dyn ContactScheduleRepo>,
    installments: Arc<dyn InstallmentRepo>,
    scheduling: Arc<ContactSchedulingService>,
    sender: Arc<NotificationSenderService>,
    tracker: Arc<PendingCallTracker>,
    events: Arc<EventDispatcher<OutreachEvent>>,
    settings: NotificationSettings,
    clock: Arc<dyn Clock>,
}

impl AutomatedRunDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedules: Arc<dyn ContactScheduleRepo>,
        installments: Arc<dyn InstallmentRepo>,
        scheduling: Arc<ContactSchedulingService>,
        sender: Arc<NotificationSenderService>,
        tracker: Arc<PendingCallTracker>,
        events: Arc<EventDispatcher<OutreachEvent>>,
        settings: NotificationSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedules,
            installments,
            scheduling,
            sender,
            tracker,
            events,
            settings,
            clock,
        }
    }

    /// Run one sweep. Only a failure to list schedules aborts it; everything
    /// per schedule is counted and logged.
    pub fn run(&self) -> NotificationResult<SweepReport> {
        let now = self.clock.now();
        let limit = self.settings.sweep_batch_limit;
        let mut report = SweepReport::default();

        for schedule in self.schedules.list_promotable(now, limit)? {
            let id = schedule.id_typed();
            match self.scheduling.apply_outcome(schedule, StepOutcome::TimeElapsed) {
                Ok(promoted) => {
                    report.promoted += 1;
                    if promoted.status() == ScheduleStatus::Done {
                        report.completed += 1;
                    }
                }
                Err(e) if e.is_conflict() || e.is_invalid_transition() => {
                    debug!(schedule_id = %id, error = %e, "promotion skipped");
                }
                Err(e) => {
                    report.errors += 1;
                    error!(schedule_id = %id, error = %e, "promotion failed");
                }
            }
        }

        self.repair_escalations(limit, &mut report)?;

        let due = self.schedules.list_due(now, limit)?;
        report.due = due.len();

        let workers = self.settings.max_concurrent.max(1);
        let chunk_size = due.len().div_ceil(workers).max(1);
        let processed = thread::scope(|scope| {
            let handles: Vec<_> = due
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || self.process_chunk(chunk)))
                .collect();

            handles
                .into_iter()
                .fold(SweepReport::default(), |acc, handle| match handle.join() {
                    Ok(partial) => acc.merge(partial),
                    Err(_) => {
                        error!("sweep worker panicked");
                        acc.merge(SweepReport {
                            errors: 1,
                            ..Default::default()
                        })
                    }
                })
        });
        report = report.merge(processed);

        info!(
            worker = %self.settings.worker_id,
            promoted = report.promoted,
            due = report.due,
            sent = report.sent,
            retried = report.retried,
            escalated = report.escalated,
            cancelled = report.cancelled,
            calls_reopened = report.calls_reopened,
            resumed = report.resumed,
            skipped = report.skipped,
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    fn repair_escalations(
        &self,
        limit: usize,
        report: &mut SweepReport,
    ) -> NotificationResult<()> {
        let escalated = self.schedules.list(&ScheduleFilter {
            status: Some(ScheduleStatus::Escalated),
            limit,
            ..Default::default()
        })?;

        for schedule in escalated {
            let id = schedule.id_typed();
            if let Err(e) = self.repair_one(schedule, report) {
                if e.is_conflict() || e.is_invalid_transition() {
                    debug!(schedule_id = %id, error = %e, "escalation changed under repair");
                } else {
                    report.errors += 1;
                    error!(schedule_id = %id, error = %e, "could not repair escalation");
                }
            }
        }
        Ok(())
    }

    fn repair_one(
        &self,
        schedule: ContactSchedule,
        report: &mut SweepReport,
    ) -> NotificationResult<()> {
        let id = schedule.id_typed();
        match self.tracker.call_for_escalation(&schedule)? {
            Some(call) if call.is_open() => {}
            Some(call) => {
                warn!(
                    schedule_id = %id,
                    call_id = %call.id,
                    "call resolved but schedule not resumed"
                );
                self.scheduling
                    .apply_outcome(schedule, StepOutcome::CallResolved)?;
                report.resumed += 1;
            }
            None => {
                let reason = format!(
                    "schedule {id}: escalated at step {}",
                    schedule.current_step_index()
                );
                if let Some(call) = self.tracker.ensure_open(id, reason)? {
                    warn!(
                        schedule_id = %id,
                        call_id = %call.id,
                        "escalation had no pending call"
                    );
                    report.calls_reopened += 1;
                }
            }
        }
        Ok(())
    }

    fn process_chunk(&self, chunk: &[ContactSchedule]) -> SweepReport {
        let mut report = SweepReport::default();
        for schedule in chunk {
            let id = schedule.id_typed();
            if let Err(e) = self.process_one(id, &mut report) {
                if e.is_conflict() || e.is_invalid_transition() {
                    // Someone else changed the schedule under us.
                    warn!(schedule_id = %id, error = %e, "schedule skipped");
                    report.skipped += 1;
                } else {
                    error!(schedule_id = %id, error = %e, "schedule processing failed");
                    report.errors += 1;
                }
                if let Err(e) = self.schedules.release(id, &self.settings.worker_id) {
                    error!(schedule_id = %id, error = %e, "could not release claim");
                }
            }
        }
        report
    }

    fn process_one(&self, id: ScheduleId, report: &mut SweepReport) -> NotificationResult<()> {
        let worker = &self.settings.worker_id;
        let now = self.clock.now();
        let Some(claimed) = self
            .schedules
            .claim(id, worker, now, self.settings.claim_ttl_chrono())?
        else {
            debug!(schedule_id = %id, %worker, "already claimed, skipping");
            report.skipped += 1;
            return Ok(());
        };

        if self.installments.overdue_count(claimed.contract_id(), now)? == 0 {
            self.scheduling
                .apply_outcome(claimed, StepOutcome::cancelled("no overdue installment"))?;
            info!(schedule_id = %id, "schedule cancelled, contract no longer overdue");
            report.cancelled += 1;
            return Ok(());
        }

        let outcome = match self.sender.send_for(&claimed, now) {
            Ok(attempt) => {
                self.events
                    .publish(&OutreachEvent::ContactAttempted(attempt.to_event(false, now)));
                attempt.outcome()
            }
            Err(e) if is_unresolvable(&e) => {
                // Retrying cannot fix a missing record; hand it to a person.
                error!(schedule_id = %id, error = %e, "schedule cannot be sent, escalating");
                StepOutcome::failed(FailureKind::Permanent, e.to_string())
            }
            Err(e) => return Err(e),
        };

        let advanced = self.scheduling.apply_outcome(claimed, outcome)?;
        match advanced.status() {
            ScheduleStatus::Sent => report.sent += 1,
            ScheduleStatus::Done => {
                report.sent += 1;
                report.completed += 1;
            }
            ScheduleStatus::Due => report.retried += 1,
            ScheduleStatus::Escalated => report.escalated += 1,
            ScheduleStatus::Pending | ScheduleStatus::Cancelled => {}
        }
        Ok(())
    }
}

/// Errors from `send_for` that no later sweep will get past.
fn is_unresolvable(error: &NotificationError) -> bool {
    matches!(
        error,
        NotificationError::NotFound(_)
            | NotificationError::Configuration(_)
            | NotificationError::Validation(_)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use notifyflow_core::WorkerId;
    use notifyflow_outreach::Channel;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::DeliveryError;
    use crate::facade::NotificationFacade;
    use crate::module::NotificationModule;
    use crate::notifier::{
        Notifier, NotifierRegistry, PlaceholderRenderer, Recipient, RenderedMessage,
    };
    use crate::testing::{self, Harness, ScriptedNotifier};

    /// Gateway whose first delivery takes longer than a claim lives. While
    /// the second one is in progress, a rival worker runs its own sweep.
    struct SlowGateway {
        clock: Arc<ManualClock>,
        rival: NotificationFacade,
        rival_report: Mutex<Option<SweepReport>>,
        calls: AtomicUsize,
    }

    impl Notifier for SlowGateway {
        fn send(&self, _: &Recipient, _: &RenderedMessage) -> Result<(), DeliveryError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => self.clock.advance(Duration::minutes(16)),
                1 => {
                    let report = self
                        .rival
                        .run_automated()
                        .map_err(|e| DeliveryError::permanent(e.to_string()))?;
                    *self.rival_report.lock().unwrap() = Some(report);
                }
                _ => {}
            }
            Ok(())
        }
    }

    #[test]
    fn claims_are_stamped_when_taken_not_when_the_sweep_started() {
        let h = Harness::new();
        let facade = h.module.facade();
        facade
            .create_schedule(h.patient_id, h.contract_id, h.flow_id)
            .unwrap();
        let (second_patient, second_contract) = h.add_overdue_contract("Second");
        facade
            .create_schedule(second_patient, second_contract, h.flow_id)
            .unwrap();

        let worker = |name: &str, notifier: Arc<dyn Notifier>| {
            let mut notifiers = NotifierRegistry::new();
            notifiers.register(Channel::Sms, notifier).unwrap();
            NotificationModule::new(
                h.module.repositories().clone(),
                notifiers,
                Arc::new(PlaceholderRenderer),
                testing::settings()
                    .with_send_timeout(StdDuration::from_secs(5))
                    .with_claim_ttl(StdDuration::from_secs(15 * 60))
                    .with_max_concurrent(1)
                    .with_worker_id(WorkerId::new(name))
                    .with_default_flow(h.flow_id),
                h.clock.clone(),
            )
            .unwrap()
        };

        let rival_sms = ScriptedNotifier::delivering();
        let rival_notifier: Arc<dyn Notifier> = rival_sms.clone();
        let rival = worker("worker-b", rival_notifier);
        let gateway = Arc::new(SlowGateway {
            clock: h.clock.clone(),
            rival: rival.facade().clone(),
            rival_report: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        let gateway_notifier: Arc<dyn Notifier> = gateway.clone();
        let main = worker("worker-a", gateway_notifier);

        let report = main.facade().run_automated().unwrap();
        assert_eq!((report.due, report.sent, report.skipped), (2, 2, 0));

        // The rival saw the second schedule still due but held by worker A.
        let rival_report = gateway.rival_report.lock().unwrap().unwrap();
        assert_eq!(
            (rival_report.due, rival_report.skipped, rival_report.sent),
            (1, 1, 0)
        );
        assert_eq!(rival_sms.calls(), 0);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn schedule_held_by_another_worker_is_skipped_until_its_claim_expires() {
        let h = Harness::new();
        let facade = h.module.facade();
        let schedule = facade
            .create_schedule(h.patient_id, h.contract_id, h.flow_id)
            .unwrap();
        facade
            .advance_step(schedule.id_typed(), StepOutcome::TimeElapsed)
            .unwrap();

        let schedules = &h.module.repositories().schedules;
        let ttl = h.module.settings().claim_ttl_chrono();
        let held = schedules
            .claim(schedule.id_typed(), &WorkerId::new("other"), h.clock.now(), ttl)
            .unwrap();
        assert!(held.is_some());

        let report = facade.run_automated().unwrap();
        assert_eq!((report.due, report.skipped, report.sent), (1, 1, 0));
        assert_eq!(h.sms.calls(), 0);

        h.clock.advance(ttl);
        let report = facade.run_automated().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.sms.calls(), 1);
    }

    #[test]
    fn reports_add_up() {
        let a = SweepReport {
            promoted: 1,
            sent: 2,
            ..Default::default()
        };
        let b = SweepReport {
            sent: 1,
            errors: 1,
            ..Default::default()
        };
        let total = a.merge(b);
        assert_eq!((total.promoted, total.sent, total.errors), (1, 3, 1));
    }
}

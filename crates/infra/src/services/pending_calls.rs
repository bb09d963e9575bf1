//! Pending call tracker: the manual-call queue for escalated schedules.

use std::sync::Arc;

use tracing::{debug, info};

use notifyflow_core::{PendingCallId, ScheduleId};
use notifyflow_events::EventDispatcher;
use notifyflow_outreach::{
    CallResolved, ContactSchedule, OutreachEvent, PendingCall, PendingCallOpened,
};

use crate::clock::Clock;
use crate::error::{NotificationError, NotificationResult};
use crate::repos::{ContactScheduleRepo, PendingCallFilter, PendingCallRepo};

pub struct PendingCallTracker {
    calls: Arc<dyn PendingCallRepo>,
    schedules: Arc<dyn ContactScheduleRepo>,
    events: Arc<EventDispatcher<OutreachEvent>>,
    clock: Arc<dyn Clock>,
}

impl PendingCallTracker {
    pub fn new(
        calls: Arc<dyn PendingCallRepo>,
        schedules: Arc<dyn ContactScheduleRepo>,
        events: Arc<EventDispatcher<OutreachEvent>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            calls,
            schedules,
            events,
            clock,
        }
    }

    /// Open a call for `schedule_id`. Fails with `AlreadyOpen` while another
    /// call for the same schedule is still open.
    pub fn create(
        &self,
        schedule_id: ScheduleId,
        reason: impl Into<String>,
    ) -> NotificationResult<PendingCall> {
        let schedule = self
            .schedules
            .get(schedule_id)?
            .ok_or_else(|| NotificationError::not_found(format!("schedule {schedule_id}")))?;

        let now = self.clock.now();
        let call = PendingCall::open(
            schedule_id,
            schedule.patient_id(),
            schedule.contract_id(),
            schedule.current_step_index(),
            reason,
            now,
        );
        self.calls.insert_open(&call)?;

        info!(
            call_id = %call.id,
            %schedule_id,
            reason = %call.reason,
            "pending call opened"
        );
        self.events
            .publish(&OutreachEvent::PendingCallOpened(PendingCallOpened {
                call_id: call.id,
                schedule_id,
                patient_id: call.patient_id,
                contract_id: call.contract_id,
                reason: call.reason.clone(),
                occurred_at: now,
            }));
        Ok(call)
    }

    /// Like `create`, but an already open call is not an error: `Ok(None)`
    /// means the schedule was covered before this call.
    pub fn ensure_open(
        &self,
        schedule_id: ScheduleId,
        reason: impl Into<String>,
    ) -> NotificationResult<Option<PendingCall>> {
        match self.create(schedule_id, reason) {
            Ok(call) => Ok(Some(call)),
            Err(NotificationError::AlreadyOpen(_)) => {
                debug!(%schedule_id, "pending call already open");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The call raised for the schedule's current escalation, open or
    /// already done. The escalation is the schedule's last transition, so
    /// calls older than it belong to an earlier escalation.
    pub fn call_for_escalation(
        &self,
        schedule: &ContactSchedule,
    ) -> NotificationResult<Option<PendingCall>> {
        let mut calls = self.calls.list(&PendingCallFilter {
            status: None,
            schedule_id: Some(schedule.id_typed()),
            limit: usize::MAX,
            ..Default::default()
        })?;
        if let Some(open) = calls.iter().position(PendingCall::is_open) {
            return Ok(Some(calls.swap_remove(open)));
        }
        let since = schedule.updated_at();
        Ok(calls
            .into_iter()
            .rev()
            .find(|call| since.is_none_or(|at| call.created_at >= at)))
    }

    /// Mark a call done (OPEN -> DONE) and announce it.
    pub fn resolve(&self, call_id: PendingCallId) -> NotificationResult<PendingCall> {
        let mut call = self.get(call_id)?;
        let now = self.clock.now();
        call.resolve(now)?;
        self.calls.save(&call)?;

        info!(%call_id, schedule_id = %call.schedule_id, "pending call resolved");
        self.events.publish(&OutreachEvent::CallResolved(CallResolved {
            call_id,
            schedule_id: call.schedule_id,
            patient_id: call.patient_id,
            step_index: call.step_index,
            occurred_at: now,
        }));
        Ok(call)
    }

    pub fn get(&self, call_id: PendingCallId) -> NotificationResult<PendingCall> {
        self.calls
            .get(call_id)?
            .ok_or_else(|| NotificationError::not_found(format!("pending call {call_id}")))
    }

    pub fn list(&self, filter: &PendingCallFilter) -> NotificationResult<Vec<PendingCall>> {
        Ok(self.calls.list(filter)?)
    }
}

#[cfg(test)]
mod tests {
    use notifyflow_core::{AggregateRoot, ScheduleId};

    use super::*;
    use crate::testing::Harness;

    fn tracker(h: &Harness) -> PendingCallTracker {
        let repos = h.module.repositories();
        PendingCallTracker::new(
            repos.pending_calls.clone(),
            repos.schedules.clone(),
            h.module.events().clone(),
            h.clock.clone(),
        )
    }

    #[test]
    fn one_open_call_per_schedule() {
        let h = Harness::new();
        let schedule = h
            .module
            .facade()
            .create_schedule(h.patient_id, h.contract_id, h.flow_id)
            .unwrap();
        let tracker = tracker(&h);

        let call = tracker.create(schedule.id_typed(), "no answer").unwrap();
        assert_eq!(call.patient_id, h.patient_id);
        assert_eq!(call.contract_id, h.contract_id);
        assert!(matches!(
            tracker.create(schedule.id_typed(), "again"),
            Err(NotificationError::AlreadyOpen(_))
        ));

        // Resolving a call on a schedule that is not escalated leaves it as is.
        tracker.resolve(call.id).unwrap();
        assert_eq!(
            h.module.scheduling().get(schedule.id_typed()).unwrap().version(),
            schedule.version()
        );
        tracker.create(schedule.id_typed(), "second round").unwrap();
    }

    #[test]
    fn unknown_schedule_is_not_found() {
        let h = Harness::new();
        assert!(matches!(
            tracker(&h).create(ScheduleId::new(), "no answer"),
            Err(NotificationError::NotFound(_))
        ));
    }
}

//! Events published on the outreach dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{ContractId, PatientId, PendingCallId, ScheduleId};
use notifyflow_events::{Event, MessageKind};

use crate::flow::Channel;
use crate::history::ContactOutcome;
use crate::schedule::{ScheduleEnrolled, ScheduleEvent, ScheduleRescheduled, StepAdvanced};

/// Event: ContactAttempted.
///
/// One per delivery attempt, automated or manual, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAttempted {
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub step_index: u32,
    pub channel: Channel,
    pub outcome: ContactOutcome,
    pub notes: Option<String>,
    /// Sent by an operator rather than by a sweep.
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PendingCallOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallOpened {
    pub call_id: PendingCallId,
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CallResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResolved {
    pub call_id: PendingCallId,
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub step_index: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutreachEvent {
    ScheduleEnrolled(ScheduleEnrolled),
    StepAdvanced(StepAdvanced),
    ScheduleRescheduled(ScheduleRescheduled),
    ContactAttempted(ContactAttempted),
    PendingCallOpened(PendingCallOpened),
    CallResolved(CallResolved),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutreachEventKind {
    ScheduleEnrolled,
    StepAdvanced,
    ScheduleRescheduled,
    ContactAttempted,
    PendingCallOpened,
    CallResolved,
}

impl MessageKind for OutreachEventKind {
    fn all() -> &'static [Self] {
        &[
            OutreachEventKind::ScheduleEnrolled,
            OutreachEventKind::StepAdvanced,
            OutreachEventKind::ScheduleRescheduled,
            OutreachEventKind::ContactAttempted,
            OutreachEventKind::PendingCallOpened,
            OutreachEventKind::CallResolved,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            OutreachEventKind::ScheduleEnrolled => "schedule_enrolled",
            OutreachEventKind::StepAdvanced => "step_advanced",
            OutreachEventKind::ScheduleRescheduled => "schedule_rescheduled",
            OutreachEventKind::ContactAttempted => "contact_attempted",
            OutreachEventKind::PendingCallOpened => "pending_call_opened",
            OutreachEventKind::CallResolved => "call_resolved",
        }
    }
}

impl Event for OutreachEvent {
    type Kind = OutreachEventKind;

    fn kind(&self) -> OutreachEventKind {
        match self {
            OutreachEvent::ScheduleEnrolled(_) => OutreachEventKind::ScheduleEnrolled,
            OutreachEvent::StepAdvanced(_) => OutreachEventKind::StepAdvanced,
            OutreachEvent::ScheduleRescheduled(_) => OutreachEventKind::ScheduleRescheduled,
            OutreachEvent::ContactAttempted(_) => OutreachEventKind::ContactAttempted,
            OutreachEvent::PendingCallOpened(_) => OutreachEventKind::PendingCallOpened,
            OutreachEvent::CallResolved(_) => OutreachEventKind::CallResolved,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            OutreachEvent::ScheduleEnrolled(_) => "outreach.schedule.enrolled",
            OutreachEvent::StepAdvanced(_) => "outreach.schedule.step_advanced",
            OutreachEvent::ScheduleRescheduled(_) => "outreach.schedule.rescheduled",
            OutreachEvent::ContactAttempted(_) => "outreach.contact.attempted",
            OutreachEvent::PendingCallOpened(_) => "outreach.pending_call.opened",
            OutreachEvent::CallResolved(_) => "outreach.pending_call.resolved",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OutreachEvent::ScheduleEnrolled(e) => e.occurred_at,
            OutreachEvent::StepAdvanced(e) => e.occurred_at,
            OutreachEvent::ScheduleRescheduled(e) => e.occurred_at,
            OutreachEvent::ContactAttempted(e) => e.occurred_at,
            OutreachEvent::PendingCallOpened(e) => e.occurred_at,
            OutreachEvent::CallResolved(e) => e.occurred_at,
        }
    }
}

impl From<ScheduleEvent> for OutreachEvent {
    fn from(event: ScheduleEvent) -> Self {
        match event {
            ScheduleEvent::ScheduleEnrolled(e) => OutreachEvent::ScheduleEnrolled(e),
            ScheduleEvent::StepAdvanced(e) => OutreachEvent::StepAdvanced(e),
            ScheduleEvent::ScheduleRescheduled(e) => OutreachEvent::ScheduleRescheduled(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_distinct_name() {
        let mut names: Vec<_> = OutreachEventKind::all().iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OutreachEventKind::all().len());
    }

    #[test]
    fn call_resolved_routes_by_kind() {
        let event = OutreachEvent::CallResolved(CallResolved {
            call_id: PendingCallId::new(),
            schedule_id: ScheduleId::new(),
            patient_id: PatientId::new(),
            step_index: 2,
            occurred_at: Utc::now(),
        });
        assert_eq!(event.kind(), OutreachEventKind::CallResolved);
        assert_eq!(event.event_type(), "outreach.pending_call.resolved");
    }
}

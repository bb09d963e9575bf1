//! `ContactSchedule`: one patient's progress through a contact flow.
//!
//! The aggregate decides transitions from the current status and an input
//! (`StepOutcome`). Flow knowledge it needs (next step delay, retry cap) is
//! handed in as a `StepPlan`, so the state machine stays free of lookups.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use notifyflow_core::{
    Aggregate, AggregateRoot, ContractId, DomainError, FlowConfigId, PatientId, ScheduleId,
    WorkerId,
};

use crate::flow::FlowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Due,
    Sent,
    Escalated,
    Done,
    Cancelled,
}

impl ScheduleStatus {
    /// DONE and CANCELLED never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScheduleStatus::Done | ScheduleStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Due => "due",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Escalated => "escalated",
            ScheduleStatus::Done => "done",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Worth retrying (gateway hiccup, timeout).
    Transient,
    /// No answer or invalid recipient; retrying will not help.
    Permanent,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Sent,
    Failed { kind: FailureKind, reason: String },
    /// `next_action_at` has passed.
    TimeElapsed,
    /// The manual call that escalated this schedule was completed.
    CallResolved,
    Cancelled { reason: String },
}

impl StepOutcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        StepOutcome::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        StepOutcome::Cancelled {
            reason: reason.into(),
        }
    }

    /// Verb used in `InvalidTransition` errors.
    pub fn action(&self) -> &'static str {
        match self {
            StepOutcome::Sent => "record a sent contact",
            StepOutcome::Failed { .. } => "record a failed contact",
            StepOutcome::TimeElapsed => "elapse",
            StepOutcome::CallResolved => "resolve a manual call",
            StepOutcome::Cancelled { .. } => "cancel",
        }
    }
}

/// Flow facts for the schedule's current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    /// Delay of the step after the current one, `None` on the last step.
    pub next_step_delay: Option<Duration>,
    /// The current step escalates on any failure.
    pub requires_voice: bool,
    /// Failed attempts tolerated before escalating.
    pub max_retries: u32,
    /// Wait before the next retry of the current step.
    pub retry_backoff: Duration,
}

impl StepPlan {
    pub fn from_flow(
        flow: &FlowConfig,
        step_index: u32,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            next_step_delay: flow.next_step(step_index).map(|s| s.delay()),
            requires_voice: flow.step(step_index).is_some_and(|s| s.requires_voice),
            max_retries,
            retry_backoff,
        }
    }
}

/// Aggregate root: ContactSchedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSchedule {
    id: ScheduleId,
    patient_id: PatientId,
    contract_id: ContractId,
    flow_config_id: FlowConfigId,
    current_step_index: u32,
    status: ScheduleStatus,
    next_action_at: Option<DateTime<Utc>>,
    retry_count: u32,
    claimed_by: Option<WorkerId>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl ContactSchedule {
    /// Create an empty, not-yet-enrolled instance.
    pub fn empty(id: ScheduleId) -> Self {
        Self {
            id,
            patient_id: PatientId::default(),
            contract_id: ContractId::default(),
            flow_config_id: FlowConfigId::default(),
            current_step_index: 0,
            status: ScheduleStatus::Pending,
            next_action_at: None,
            retry_count: 0,
            claimed_by: None,
            claimed_at: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ScheduleId {
        self.id
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    pub fn flow_config_id(&self) -> FlowConfigId {
        self.flow_config_id
    }

    pub fn current_step_index(&self) -> u32 {
        self.current_step_index
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn next_action_at(&self) -> Option<DateTime<Utc>> {
        self.next_action_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn claimed_by(&self) -> Option<&WorkerId> {
        self.claimed_by.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.created && !self.status.is_terminal()
    }

    /// `next_action_at` has passed.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.next_action_at.is_some_and(|at| at <= now)
    }

    /// Waiting in PENDING or SENT for its timer.
    pub fn is_promotable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ScheduleStatus::Pending | ScheduleStatus::Sent) && self.is_due_at(now)
    }

    /// DUE, timer passed, and not held by a live claim.
    pub fn is_claimable(&self, now: DateTime<Utc>, claim_ttl: Duration) -> bool {
        if self.status != ScheduleStatus::Due || !self.is_due_at(now) {
            return false;
        }
        match self.claimed_at {
            None => true,
            Some(at) => at + claim_ttl <= now,
        }
    }

    /// Claims are persistence bookkeeping; they do not bump the version.
    pub fn mark_claimed(&mut self, worker: WorkerId, now: DateTime<Utc>) {
        self.claimed_by = Some(worker);
        self.claimed_at = Some(now);
    }

    pub fn release_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

impl AggregateRoot for ContactSchedule {
    type Id = ScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: EnrollSchedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollSchedule {
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    pub flow_config_id: FlowConfigId,
    pub first_step_delay: Duration,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceSchedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceSchedule {
    pub schedule_id: ScheduleId,
    pub outcome: StepOutcome,
    pub plan: StepPlan,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RescheduleContact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescheduleContact {
    pub schedule_id: ScheduleId,
    pub next_action_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleCommand {
    Enroll(EnrollSchedule),
    Advance(AdvanceSchedule),
    Reschedule(RescheduleContact),
}

/// Event: ScheduleEnrolled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEnrolled {
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    pub flow_config_id: FlowConfigId,
    pub next_action_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StepAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAdvanced {
    pub schedule_id: ScheduleId,
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    pub from_status: ScheduleStatus,
    pub to_status: ScheduleStatus,
    pub from_step: u32,
    pub to_step: u32,
    pub outcome: StepOutcome,
    pub retry_count: u32,
    pub next_action_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ScheduleRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRescheduled {
    pub schedule_id: ScheduleId,
    pub previous: Option<DateTime<Utc>>,
    pub next_action_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    ScheduleEnrolled(ScheduleEnrolled),
    StepAdvanced(StepAdvanced),
    ScheduleRescheduled(ScheduleRescheduled),
}

impl ScheduleEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleEvent::ScheduleEnrolled(e) => e.occurred_at,
            ScheduleEvent::StepAdvanced(e) => e.occurred_at,
            ScheduleEvent::ScheduleRescheduled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ContactSchedule {
    type Command = ScheduleCommand;
    type Event = ScheduleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScheduleEvent::ScheduleEnrolled(e) => {
                self.id = e.schedule_id;
                self.patient_id = e.patient_id;
                self.contract_id = e.contract_id;
                self.flow_config_id = e.flow_config_id;
                self.current_step_index = 0;
                self.status = ScheduleStatus::Pending;
                self.next_action_at = Some(e.next_action_at);
                self.retry_count = 0;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ScheduleEvent::StepAdvanced(e) => {
                self.status = e.to_status;
                self.current_step_index = e.to_step;
                self.retry_count = e.retry_count;
                self.next_action_at = e.next_action_at;
            }
            ScheduleEvent::ScheduleRescheduled(e) => {
                self.next_action_at = Some(e.next_action_at);
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.release_claim();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ScheduleCommand::Enroll(cmd) => self.handle_enroll(cmd),
            ScheduleCommand::Advance(cmd) => self.handle_advance(cmd),
            ScheduleCommand::Reschedule(cmd) => self.handle_reschedule(cmd),
        }
    }
}

/// Result of one transition before it is wrapped into an event.
struct Transition {
    status: ScheduleStatus,
    step: u32,
    retry_count: u32,
    next_action_at: Option<DateTime<Utc>>,
}

impl ContactSchedule {
    fn ensure_schedule_id(&self, schedule_id: ScheduleId) -> Result<(), DomainError> {
        if self.id != schedule_id {
            return Err(DomainError::validation("schedule_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(self.status, action));
        }
        Ok(())
    }

    fn handle_enroll(&self, cmd: &EnrollSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("schedule already exists"));
        }
        if cmd.first_step_delay < Duration::zero() {
            return Err(DomainError::validation("first step delay must not be negative"));
        }

        Ok(vec![ScheduleEvent::ScheduleEnrolled(ScheduleEnrolled {
            schedule_id: cmd.schedule_id,
            patient_id: cmd.patient_id,
            contract_id: cmd.contract_id,
            flow_config_id: cmd.flow_config_id,
            next_action_at: cmd.occurred_at + cmd.first_step_delay,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance(&self, cmd: &AdvanceSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        self.ensure_active(cmd.outcome.action())?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        let transition = self.transition(&cmd.outcome, &cmd.plan, cmd.occurred_at)?;

        Ok(vec![ScheduleEvent::StepAdvanced(StepAdvanced {
            schedule_id: self.id,
            patient_id: self.patient_id,
            contract_id: self.contract_id,
            from_status: self.status,
            to_status: transition.status,
            from_step: self.current_step_index,
            to_step: transition.step,
            outcome: cmd.outcome.clone(),
            retry_count: transition.retry_count,
            next_action_at: transition.next_action_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn transition(
        &self,
        outcome: &StepOutcome,
        plan: &StepPlan,
        now: DateTime<Utc>,
    ) -> Result<Transition, DomainError> {
        let step = self.current_step_index;
        let stay = |status, retry_count, next_action_at| Transition {
            status,
            step,
            retry_count,
            next_action_at,
        };

        match (self.status, outcome) {
            (_, StepOutcome::Cancelled { .. }) => {
                Ok(stay(ScheduleStatus::Cancelled, self.retry_count, None))
            }

            (ScheduleStatus::Pending, StepOutcome::TimeElapsed) => {
                self.ensure_elapsed(now)?;
                Ok(stay(ScheduleStatus::Due, 0, self.next_action_at))
            }

            (ScheduleStatus::Due, StepOutcome::Sent) => Ok(match plan.next_step_delay {
                Some(delay) => stay(ScheduleStatus::Sent, self.retry_count, Some(now + delay)),
                None => stay(ScheduleStatus::Done, self.retry_count, None),
            }),

            (ScheduleStatus::Due, StepOutcome::Failed { kind, .. }) => {
                let retries_left = self.retry_count < plan.max_retries;
                if *kind == FailureKind::Transient && !plan.requires_voice && retries_left {
                    Ok(stay(
                        ScheduleStatus::Due,
                        self.retry_count + 1,
                        Some(now + plan.retry_backoff),
                    ))
                } else {
                    Ok(stay(ScheduleStatus::Escalated, self.retry_count, None))
                }
            }

            (ScheduleStatus::Sent, StepOutcome::TimeElapsed) => {
                self.ensure_elapsed(now)?;
                Ok(self.move_to_next_step(plan, now))
            }

            (ScheduleStatus::Escalated, StepOutcome::CallResolved) => {
                // The next step waits its own delay counted from the call.
                let mut next = self.move_to_next_step(plan, now);
                if let Some(delay) = plan.next_step_delay {
                    next.next_action_at = Some(now + delay);
                }
                Ok(next)
            }

            (status, outcome) => Err(DomainError::invalid_transition(status, outcome.action())),
        }
    }

    /// DUE on the following step at `now`, or DONE when the flow has ended.
    fn move_to_next_step(&self, plan: &StepPlan, now: DateTime<Utc>) -> Transition {
        match plan.next_step_delay {
            Some(_) => Transition {
                status: ScheduleStatus::Due,
                step: self.current_step_index + 1,
                retry_count: 0,
                next_action_at: Some(now),
            },
            None => Transition {
                status: ScheduleStatus::Done,
                step: self.current_step_index,
                retry_count: 0,
                next_action_at: None,
            },
        }
    }

    fn ensure_elapsed(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_due_at(now) {
            Ok(())
        } else {
            Err(DomainError::validation("next action time has not been reached"))
        }
    }

    fn handle_reschedule(
        &self,
        cmd: &RescheduleContact,
    ) -> Result<Vec<ScheduleEvent>, DomainError> {
        self.ensure_active("reschedule")?;
        self.ensure_schedule_id(cmd.schedule_id)?;

        Ok(vec![ScheduleEvent::ScheduleRescheduled(ScheduleRescheduled {
            schedule_id: self.id,
            previous: self.next_action_at,
            next_action_at: cmd.next_action_at,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use notifyflow_events::execute;
    use proptest::prelude::*;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn plan(next_step_delay: Option<Duration>) -> StepPlan {
        StepPlan {
            next_step_delay,
            requires_voice: false,
            max_retries: 3,
            retry_backoff: Duration::minutes(5),
        }
    }

    fn enrolled(first_step_delay: Duration) -> ContactSchedule {
        let id = ScheduleId::new();
        let mut schedule = ContactSchedule::empty(id);
        execute(
            &mut schedule,
            &ScheduleCommand::Enroll(EnrollSchedule {
                schedule_id: id,
                patient_id: PatientId::new(),
                contract_id: ContractId::new(),
                flow_config_id: FlowConfigId::new(),
                first_step_delay,
                occurred_at: t0(),
            }),
        )
        .unwrap();
        schedule
    }

    fn advance(
        schedule: &mut ContactSchedule,
        outcome: StepOutcome,
        plan: StepPlan,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEvent>, DomainError> {
        let cmd = ScheduleCommand::Advance(AdvanceSchedule {
            schedule_id: schedule.id_typed(),
            outcome,
            plan,
            occurred_at: at,
        });
        execute(schedule, &cmd)
    }

    fn due_schedule() -> ContactSchedule {
        let mut schedule = enrolled(Duration::zero());
        advance(&mut schedule, StepOutcome::TimeElapsed, plan(None), t0()).unwrap();
        schedule
    }

    #[test]
    fn enroll_starts_pending_at_step_zero() {
        let schedule = enrolled(Duration::hours(2));
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(schedule.current_step_index(), 0);
        assert_eq!(schedule.next_action_at(), Some(t0() + Duration::hours(2)));
        assert_eq!(schedule.version(), 1);
    }

    #[test]
    fn enroll_twice_is_a_conflict() {
        let schedule = enrolled(Duration::zero());
        let err = schedule
            .handle(&ScheduleCommand::Enroll(EnrollSchedule {
                schedule_id: schedule.id_typed(),
                patient_id: schedule.patient_id(),
                contract_id: schedule.contract_id(),
                flow_config_id: schedule.flow_config_id(),
                first_step_delay: Duration::zero(),
                occurred_at: t0(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn pending_does_not_elapse_early() {
        let mut schedule = enrolled(Duration::hours(1));
        let err = advance(&mut schedule, StepOutcome::TimeElapsed, plan(None), t0()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
    }

    #[test]
    fn sent_waits_for_next_step_delay() {
        let mut schedule = due_schedule();
        let later = t0() + Duration::minutes(1);
        advance(&mut schedule, StepOutcome::Sent, plan(Some(Duration::days(3))), later).unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Sent);
        assert_eq!(schedule.current_step_index(), 0);
        assert_eq!(schedule.next_action_at(), Some(later + Duration::days(3)));
    }

    #[test]
    fn sent_on_last_step_finishes() {
        let mut schedule = due_schedule();
        let events = advance(&mut schedule, StepOutcome::Sent, plan(None), t0()).unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Done);
        assert_eq!(schedule.next_action_at(), None);
        match &events[0] {
            ScheduleEvent::StepAdvanced(e) => assert_eq!(e.to_status, ScheduleStatus::Done),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn elapsed_sent_moves_to_next_step() {
        let mut schedule = due_schedule();
        advance(&mut schedule, StepOutcome::Sent, plan(Some(Duration::hours(1))), t0()).unwrap();
        let later = t0() + Duration::hours(1);
        advance(&mut schedule, StepOutcome::TimeElapsed, plan(Some(Duration::hours(1))), later)
            .unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Due);
        assert_eq!(schedule.current_step_index(), 1);
        assert_eq!(schedule.retry_count(), 0);
        assert_eq!(schedule.next_action_at(), Some(later));
    }

    #[test]
    fn transient_failure_below_cap_retries_same_step() {
        let mut schedule = due_schedule();
        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Transient, "gateway 503"),
            plan(Some(Duration::hours(1))),
            t0(),
        )
        .unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Due);
        assert_eq!(schedule.current_step_index(), 0);
        assert_eq!(schedule.retry_count(), 1);
        assert_eq!(schedule.next_action_at(), Some(t0() + Duration::minutes(5)));
    }

    #[test]
    fn transient_failure_past_cap_escalates() {
        let mut schedule = due_schedule();
        for _ in 0..3 {
            advance(
                &mut schedule,
                StepOutcome::failed(FailureKind::Transient, "timeout"),
                plan(None),
                t0(),
            )
            .unwrap();
        }
        assert_eq!(schedule.retry_count(), 3);
        assert_eq!(schedule.status(), ScheduleStatus::Due);

        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Transient, "timeout"),
            plan(None),
            t0(),
        )
        .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Escalated);
    }

    #[test]
    fn permanent_failure_escalates_immediately() {
        let mut schedule = due_schedule();
        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Permanent, "invalid number"),
            plan(Some(Duration::hours(1))),
            t0(),
        )
        .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Escalated);
        assert_eq!(schedule.next_action_at(), None);
    }

    #[test]
    fn voice_step_escalates_on_transient_failure() {
        let mut schedule = due_schedule();
        let mut voice = plan(None);
        voice.requires_voice = true;
        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Transient, "busy"),
            voice,
            t0(),
        )
        .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Escalated);
    }

    #[test]
    fn resolved_call_resumes_on_next_step() {
        let mut schedule = due_schedule();
        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Permanent, "no answer"),
            plan(Some(Duration::hours(4))),
            t0(),
        )
        .unwrap();
        let later = t0() + Duration::days(1);
        advance(&mut schedule, StepOutcome::CallResolved, plan(Some(Duration::hours(4))), later)
            .unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Due);
        assert_eq!(schedule.current_step_index(), 1);
        assert_eq!(schedule.next_action_at(), Some(later + Duration::hours(4)));
    }

    #[test]
    fn resolved_call_on_last_step_finishes() {
        let mut schedule = due_schedule();
        advance(
            &mut schedule,
            StepOutcome::failed(FailureKind::Permanent, "no answer"),
            plan(None),
            t0(),
        )
        .unwrap();
        advance(&mut schedule, StepOutcome::CallResolved, plan(None), t0()).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Done);
    }

    #[test]
    fn sent_is_rejected_while_pending() {
        let mut schedule = enrolled(Duration::hours(1));
        let before = schedule.clone();
        let err = advance(&mut schedule, StepOutcome::Sent, plan(None), t0()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(schedule, before);
    }

    #[test]
    fn cancel_then_anything_is_invalid() {
        let mut schedule = due_schedule();
        advance(&mut schedule, StepOutcome::cancelled("paid"), plan(None), t0()).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Cancelled);

        let err = advance(&mut schedule, StepOutcome::Sent, plan(None), t0()).unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_transition(ScheduleStatus::Cancelled, "record a sent contact")
        );

        let err = schedule
            .handle(&ScheduleCommand::Reschedule(RescheduleContact {
                schedule_id: schedule.id_typed(),
                next_action_at: t0(),
                occurred_at: t0(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn reschedule_replaces_next_action() {
        let mut schedule = enrolled(Duration::hours(1));
        let target = t0() + Duration::days(7);
        let schedule_id = schedule.id_typed();
        execute(
            &mut schedule,
            &ScheduleCommand::Reschedule(RescheduleContact {
                schedule_id,
                next_action_at: target,
                occurred_at: t0(),
            }),
        )
        .unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(schedule.next_action_at(), Some(target));
    }

    #[test]
    fn claims_expire_and_clear_on_write() {
        let mut schedule = due_schedule();
        let ttl = Duration::minutes(15);
        assert!(schedule.is_claimable(t0(), ttl));

        schedule.mark_claimed(WorkerId::new("w1"), t0());
        assert!(!schedule.is_claimable(t0() + Duration::minutes(1), ttl));
        assert!(schedule.is_claimable(t0() + Duration::minutes(15), ttl));

        advance(&mut schedule, StepOutcome::Sent, plan(None), t0()).unwrap();
        assert!(schedule.claimed_by().is_none());
    }

    #[derive(Debug, Clone)]
    enum Input {
        Elapse,
        Sent,
        Transient,
        Permanent,
        Resolve,
        Cancel,
    }

    fn input() -> impl Strategy<Value = Input> {
        prop_oneof![
            4 => Just(Input::Elapse),
            4 => Just(Input::Sent),
            2 => Just(Input::Transient),
            1 => Just(Input::Permanent),
            2 => Just(Input::Resolve),
            1 => Just(Input::Cancel),
        ]
    }

    fn outcome(input: &Input) -> StepOutcome {
        match input {
            Input::Elapse => StepOutcome::TimeElapsed,
            Input::Sent => StepOutcome::Sent,
            Input::Transient => StepOutcome::failed(FailureKind::Transient, "flaky"),
            Input::Permanent => StepOutcome::failed(FailureKind::Permanent, "gone"),
            Input::Resolve => StepOutcome::CallResolved,
            Input::Cancel => StepOutcome::cancelled("stop"),
        }
    }

    proptest! {
        #[test]
        fn step_index_never_decreases_and_terminal_is_final(
            inputs in proptest::collection::vec(input(), 1..60),
            steps in 1u32..6,
        ) {
            let mut schedule = enrolled(Duration::zero());
            let mut now = t0();

            for input in inputs {
                // Far enough ahead that every timer has passed.
                now += Duration::days(30);
                let step = schedule.current_step_index();
                let last = step + 1 >= steps;
                let plan = plan((!last).then(|| Duration::hours(1)));
                let was_terminal = schedule.status().is_terminal();
                let before = schedule.clone();

                let result = advance(&mut schedule, outcome(&input), plan, now);

                prop_assert!(schedule.current_step_index() >= step);
                prop_assert!(schedule.current_step_index() < steps);
                if was_terminal {
                    let is_invalid = matches!(result, Err(DomainError::InvalidTransition { .. }));
                    prop_assert!(is_invalid);
                    prop_assert_eq!(&schedule, &before);
                }
                if result.is_err() {
                    prop_assert_eq!(&schedule, &before);
                }
            }
        }
    }
}

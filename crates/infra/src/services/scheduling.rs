//! Contact scheduling: enrolment and every schedule transition.
//!
//! All schedule writes go through this service. Each one runs the aggregate
//! (decide, then apply), saves with the version it was loaded at, and only
//! then publishes the resulting events. A stale copy never overwrites a newer
//! one; it fails with `Conflict` instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use notifyflow_core::{
    AggregateRoot, ContractId, ExpectedVersion, FlowConfigId, PatientId, ScheduleId,
};
use notifyflow_events::{EventDispatcher, execute};
use notifyflow_outreach::{
    AdvanceSchedule, ContactSchedule, EnrollSchedule, FlowConfig, OutreachEvent,
    RescheduleContact, ScheduleCommand, ScheduleEvent, StepOutcome, StepPlan,
};

use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::error::{NotificationError, NotificationResult, RepoError};
use crate::repos::{ContactScheduleRepo, FlowStepConfigRepo};

pub struct ContactSchedulingService {
    schedules: Arc<dyn ContactScheduleRepo>,
    flows: Arc<dyn FlowStepConfigRepo>,
    events: Arc<EventDispatcher<OutreachEvent>>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ContactSchedulingService {
    pub fn new(
        schedules: Arc<dyn ContactScheduleRepo>,
        flows: Arc<dyn FlowStepConfigRepo>,
        events: Arc<EventDispatcher<OutreachEvent>>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedules,
            flows,
            events,
            retry,
            clock,
        }
    }

    pub fn get(&self, schedule_id: ScheduleId) -> NotificationResult<ContactSchedule> {
        self.schedules
            .get(schedule_id)?
            .ok_or_else(|| NotificationError::not_found(format!("schedule {schedule_id}")))
    }

    pub fn flow(&self, flow_config_id: FlowConfigId) -> NotificationResult<FlowConfig> {
        self.flows
            .get(flow_config_id)?
            .ok_or_else(|| NotificationError::not_found(format!("flow {flow_config_id}")))
    }

    /// Enrol a (patient, contract) pair at step 0, PENDING until the first
    /// step's delay has passed.
    pub fn create_schedule(
        &self,
        patient_id: PatientId,
        contract_id: ContractId,
        flow_config_id: FlowConfigId,
    ) -> NotificationResult<ContactSchedule> {
        let flow = self.flow(flow_config_id)?;

        if let Some(active) = self.schedules.find_active(patient_id, contract_id)? {
            return Err(NotificationError::DuplicateEnrollment(format!(
                "schedule {} is already active for contract {contract_id}",
                active.id_typed()
            )));
        }

        let schedule_id = ScheduleId::new();
        let mut schedule = ContactSchedule::empty(schedule_id);
        let events = execute(
            &mut schedule,
            &ScheduleCommand::Enroll(EnrollSchedule {
                schedule_id,
                patient_id,
                contract_id,
                flow_config_id,
                first_step_delay: flow.first_step().delay(),
                occurred_at: self.clock.now(),
            }),
        )?;

        // The repository re-checks uniqueness atomically; losing a race with
        // a concurrent enrolment reads as a duplicate.
        self.schedules.insert(&schedule).map_err(|e| match e {
            RepoError::Conflict(msg) => NotificationError::DuplicateEnrollment(msg),
            other => other.into(),
        })?;

        debug!(%schedule_id, %patient_id, %contract_id, "schedule created");
        self.publish(events);
        Ok(schedule)
    }

    /// Load the schedule and apply `outcome`.
    pub fn advance_step(
        &self,
        schedule_id: ScheduleId,
        outcome: StepOutcome,
    ) -> NotificationResult<ContactSchedule> {
        let schedule = self.get(schedule_id)?;
        self.apply_outcome(schedule, outcome)
    }

    /// Apply `outcome` to a copy the caller already holds (a sweep's claimed
    /// copy, for instance). Fails with `Conflict` if the stored schedule has
    /// moved on since that copy was read.
    pub fn apply_outcome(
        &self,
        mut schedule: ContactSchedule,
        outcome: StepOutcome,
    ) -> NotificationResult<ContactSchedule> {
        let plan = self.plan_for(&schedule)?;
        let loaded_version = schedule.version();
        let schedule_id = schedule.id_typed();
        let events = execute(
            &mut schedule,
            &ScheduleCommand::Advance(AdvanceSchedule {
                schedule_id,
                outcome,
                plan,
                occurred_at: self.clock.now(),
            }),
        )?;

        self.schedules
            .save(&schedule, ExpectedVersion::Exact(loaded_version))?;
        debug!(
            %schedule_id,
            step_index = schedule.current_step_index(),
            status = %schedule.status(),
            "schedule advanced"
        );
        self.publish(events);
        Ok(schedule)
    }

    pub fn reschedule(
        &self,
        schedule_id: ScheduleId,
        next_action_at: DateTime<Utc>,
    ) -> NotificationResult<ContactSchedule> {
        let mut schedule = self.get(schedule_id)?;
        let loaded_version = schedule.version();
        let events = execute(
            &mut schedule,
            &ScheduleCommand::Reschedule(RescheduleContact {
                schedule_id,
                next_action_at,
                occurred_at: self.clock.now(),
            }),
        )?;

        self.schedules
            .save(&schedule, ExpectedVersion::Exact(loaded_version))?;
        self.publish(events);
        Ok(schedule)
    }

    pub fn cancel(
        &self,
        schedule_id: ScheduleId,
        reason: impl Into<String>,
    ) -> NotificationResult<ContactSchedule> {
        self.advance_step(schedule_id, StepOutcome::cancelled(reason))
    }

    fn plan_for(&self, schedule: &ContactSchedule) -> NotificationResult<StepPlan> {
        let flow = self.flow(schedule.flow_config_id())?;
        let next_attempt = schedule.retry_count() + 1;
        Ok(StepPlan::from_flow(
            &flow,
            schedule.current_step_index(),
            self.retry.max_attempts,
            self.retry.backoff_for_attempt(next_attempt),
        ))
    }

    fn publish(&self, events: Vec<ScheduleEvent>) {
        for event in events {
            self.events.publish(&OutreachEvent::from(event));
        }
    }
}

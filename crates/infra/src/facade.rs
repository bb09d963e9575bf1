//! Notification facade: the single entry point for callers.
//!
//! Every method builds a command or query, dispatches it on the matching bus
//! and unwraps the reply into the type the caller expects. The facade holds
//! no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use notifyflow_core::{ContractId, FlowConfigId, MessageId, PatientId, PendingCallId, ScheduleId};
use notifyflow_outreach::{Channel, ContactSchedule, Message, PendingCall, StepOutcome};

use crate::commands::{
    AdvanceContactStep, BulkScheduleContacts, BulkScheduleOverdue, CommandReply,
    CreateContactSchedule, CreateMessage, DeleteContactSchedule, DeleteMessage,
    NotificationCommand, RecordContactSent, RunAutomatedNotifications, SendManualNotification,
    SetPendingCallDone, UpdateContactSchedule, UpdateMessage,
};
use crate::error::{NotificationError, NotificationResult};
use crate::handlers::{CommandBus, QueryBus};
use crate::queries::{NotificationQuery, QueryReply};
use crate::repos::{PendingCallFilter, ScheduleFilter};
use crate::services::{BulkEnrollmentReport, DeliveryAttempt, SweepReport};

#[derive(Clone)]
pub struct NotificationFacade {
    commands: Arc<CommandBus>,
    queries: Arc<QueryBus>,
}

impl NotificationFacade {
    pub fn new(commands: Arc<CommandBus>, queries: Arc<QueryBus>) -> Self {
        Self { commands, queries }
    }

    /// Dispatch any command and return the raw reply.
    pub fn execute(&self, command: NotificationCommand) -> NotificationResult<CommandReply> {
        self.commands.dispatch(command)
    }

    /// Dispatch any query and return the raw reply.
    pub fn query(&self, query: NotificationQuery) -> NotificationResult<QueryReply> {
        self.queries.dispatch(query)
    }

    pub fn create_schedule(
        &self,
        patient_id: PatientId,
        contract_id: ContractId,
        flow_config_id: FlowConfigId,
    ) -> NotificationResult<ContactSchedule> {
        let reply = self.execute(NotificationCommand::CreateContactSchedule(
            CreateContactSchedule {
                patient_id,
                contract_id,
                flow_config_id,
            },
        ))?;
        expect_schedule(reply)
    }

    pub fn advance_step(
        &self,
        schedule_id: ScheduleId,
        outcome: StepOutcome,
    ) -> NotificationResult<ContactSchedule> {
        let reply = self.execute(NotificationCommand::AdvanceContactStep(AdvanceContactStep {
            schedule_id,
            outcome,
        }))?;
        expect_schedule(reply)
    }

    pub fn record_contact_sent(
        &self,
        schedule_id: ScheduleId,
        step_index: u32,
        channel: Channel,
    ) -> NotificationResult<ContactSchedule> {
        let reply = self.execute(NotificationCommand::RecordContactSent(RecordContactSent {
            schedule_id,
            step_index,
            channel,
        }))?;
        expect_schedule(reply)
    }

    pub fn send_manual(&self, schedule_id: ScheduleId) -> NotificationResult<DeliveryAttempt> {
        match self.execute(NotificationCommand::SendManualNotification(
            SendManualNotification { schedule_id },
        ))? {
            CommandReply::Attempt(attempt) => Ok(attempt),
            other => Err(unexpected("delivery attempt", &other)),
        }
    }

    pub fn run_automated(&self) -> NotificationResult<SweepReport> {
        match self.execute(NotificationCommand::RunAutomatedNotifications(
            RunAutomatedNotifications,
        ))? {
            CommandReply::Sweep(report) => Ok(report),
            other => Err(unexpected("sweep report", &other)),
        }
    }

    pub fn bulk_schedule(
        &self,
        contract_ids: Vec<ContractId>,
    ) -> NotificationResult<BulkEnrollmentReport> {
        let reply = self.execute(NotificationCommand::BulkScheduleContacts(
            BulkScheduleContacts { contract_ids },
        ))?;
        expect_enrollment(reply)
    }

    pub fn bulk_schedule_overdue(&self) -> NotificationResult<BulkEnrollmentReport> {
        let reply =
            self.execute(NotificationCommand::BulkScheduleOverdue(BulkScheduleOverdue))?;
        expect_enrollment(reply)
    }

    pub fn set_pending_call_done(&self, call_id: PendingCallId) -> NotificationResult<PendingCall> {
        match self.execute(NotificationCommand::SetPendingCallDone(SetPendingCallDone {
            call_id,
        }))? {
            CommandReply::PendingCall(call) => Ok(call),
            other => Err(unexpected("pending call", &other)),
        }
    }

    pub fn create_message(
        &self,
        channel: Channel,
        subject: Option<String>,
        content: impl Into<String>,
        is_default: bool,
    ) -> NotificationResult<Message> {
        let reply = self.execute(NotificationCommand::CreateMessage(CreateMessage {
            channel,
            subject,
            content: content.into(),
            is_default,
        }))?;
        expect_message(reply)
    }

    pub fn update_message(
        &self,
        message_id: MessageId,
        subject: Option<String>,
        content: impl Into<String>,
        is_default: bool,
    ) -> NotificationResult<Message> {
        let reply = self.execute(NotificationCommand::UpdateMessage(UpdateMessage {
            message_id,
            subject,
            content: content.into(),
            is_default,
        }))?;
        expect_message(reply)
    }

    pub fn delete_message(&self, message_id: MessageId) -> NotificationResult<()> {
        match self.execute(NotificationCommand::DeleteMessage(DeleteMessage { message_id }))? {
            CommandReply::Done => Ok(()),
            other => Err(unexpected("acknowledgement", &other)),
        }
    }

    pub fn update_schedule(
        &self,
        schedule_id: ScheduleId,
        next_action_at: DateTime<Utc>,
    ) -> NotificationResult<ContactSchedule> {
        let reply = self.execute(NotificationCommand::UpdateContactSchedule(
            UpdateContactSchedule {
                schedule_id,
                next_action_at,
            },
        ))?;
        expect_schedule(reply)
    }

    /// Soft delete: the schedule is cancelled, its history kept.
    pub fn delete_schedule(&self, schedule_id: ScheduleId) -> NotificationResult<ContactSchedule> {
        let reply = self.execute(NotificationCommand::DeleteContactSchedule(
            DeleteContactSchedule { schedule_id },
        ))?;
        expect_schedule(reply)
    }

    pub fn list_pending_schedules(
        &self,
        filter: ScheduleFilter,
    ) -> NotificationResult<Vec<ContactSchedule>> {
        match self.query(NotificationQuery::ListPendingSchedules(filter))? {
            QueryReply::Schedules(schedules) => Ok(schedules),
            other => Err(unexpected("schedule list", &other)),
        }
    }

    pub fn list_pending_calls(
        &self,
        filter: PendingCallFilter,
    ) -> NotificationResult<Vec<PendingCall>> {
        match self.query(NotificationQuery::ListPendingCalls(filter))? {
            QueryReply::PendingCalls(calls) => Ok(calls),
            other => Err(unexpected("pending call list", &other)),
        }
    }

    pub fn get_pending_call(&self, call_id: PendingCallId) -> NotificationResult<PendingCall> {
        match self.query(NotificationQuery::GetPendingCall(call_id))? {
            QueryReply::PendingCall(call) => Ok(call),
            other => Err(unexpected("pending call", &other)),
        }
    }
}

fn expect_schedule(reply: CommandReply) -> NotificationResult<ContactSchedule> {
    match reply {
        CommandReply::Schedule(schedule) => Ok(schedule),
        other => Err(unexpected("schedule", &other)),
    }
}

fn expect_enrollment(reply: CommandReply) -> NotificationResult<BulkEnrollmentReport> {
    match reply {
        CommandReply::Enrollment(report) => Ok(report),
        other => Err(unexpected("enrollment report", &other)),
    }
}

fn expect_message(reply: CommandReply) -> NotificationResult<Message> {
    match reply {
        CommandReply::Message(message) => Ok(message),
        other => Err(unexpected("message", &other)),
    }
}

fn unexpected(wanted: &str, got: &impl std::fmt::Debug) -> NotificationError {
    NotificationError::Configuration(format!("expected a {wanted} reply, got {got:?}"))
}

//! Command and query handlers, and the buses that route to them.
//!
//! Handlers translate one message into calls on the services. Each message
//! kind is bound to exactly one handler; `command_bus` and `query_bus` build
//! with `build_exhaustive`, so a kind left without a handler stops startup.

use std::sync::Arc;

use tracing::info;

use notifyflow_events::{EventDispatcher, MessageBus, MessageBusBuilder, MessageKind};
use notifyflow_outreach::{
    ContactAttempted, ContactOutcome, OutreachEvent, ScheduleStatus, StepOutcome,
};

use crate::clock::Clock;
use crate::commands::{
    AdvanceContactStep, BulkScheduleContacts, CommandReply, CreateContactSchedule, CreateMessage,
    DeleteContactSchedule, DeleteMessage, NotificationCommand, NotificationCommandKind,
    RecordContactSent, SendManualNotification, SetPendingCallDone, UpdateContactSchedule,
    UpdateMessage,
};
use crate::error::{NotificationError, NotificationResult};
use crate::queries::{NotificationQuery, NotificationQueryKind, QueryReply};
use crate::repos::{ContactScheduleRepo, FlowStepConfigRepo, MessageRepo};
use crate::services::{
    AutomatedRunDriver, BulkScheduler, ContactSchedulingService, NotificationSenderService,
    PendingCallTracker,
};

pub type CommandBus = MessageBus<NotificationCommand, CommandReply, NotificationError>;
pub type QueryBus = MessageBus<NotificationQuery, QueryReply, NotificationError>;

type CommandResult = NotificationResult<CommandReply>;

/// Everything the command handlers call into.
pub struct CommandHandlers {
    pub(crate) scheduling: Arc<ContactSchedulingService>,
    pub(crate) sender: Arc<NotificationSenderService>,
    pub(crate) run_driver: Arc<AutomatedRunDriver>,
    pub(crate) bulk: Arc<BulkScheduler>,
    pub(crate) tracker: Arc<PendingCallTracker>,
    pub(crate) messages: Arc<dyn MessageRepo>,
    pub(crate) flows: Arc<dyn FlowStepConfigRepo>,
    pub(crate) events: Arc<EventDispatcher<OutreachEvent>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl CommandHandlers {
    fn create_schedule(&self, cmd: CreateContactSchedule) -> CommandResult {
        self.scheduling
            .create_schedule(cmd.patient_id, cmd.contract_id, cmd.flow_config_id)
            .map(CommandReply::Schedule)
    }

    fn advance_step(&self, cmd: AdvanceContactStep) -> CommandResult {
        self.scheduling
            .advance_step(cmd.schedule_id, cmd.outcome)
            .map(CommandReply::Schedule)
    }

    fn record_contact_sent(&self, cmd: RecordContactSent) -> CommandResult {
        let schedule = self.scheduling.get(cmd.schedule_id)?;
        if schedule.status().is_terminal() {
            return Err(NotificationError::InvalidTransition {
                status: schedule.status().to_string(),
                action: "record a sent contact".to_string(),
            });
        }
        if cmd.step_index > schedule.current_step_index() {
            return Err(NotificationError::Validation(format!(
                "step {} has not been reached (current step {})",
                cmd.step_index,
                schedule.current_step_index()
            )));
        }

        // Advance first: a write that loses a race must not leave a history
        // entry behind.
        let on_current_step = cmd.step_index == schedule.current_step_index();
        let schedule = if on_current_step && schedule.status() == ScheduleStatus::Due {
            self.scheduling.apply_outcome(schedule, StepOutcome::Sent)?
        } else {
            schedule
        };

        self.events
            .publish(&OutreachEvent::ContactAttempted(ContactAttempted {
                schedule_id: cmd.schedule_id,
                patient_id: schedule.patient_id(),
                step_index: cmd.step_index,
                channel: cmd.channel,
                outcome: ContactOutcome::Sent,
                notes: Some("recorded outside the automated run".to_string()),
                manual: true,
                occurred_at: self.clock.now(),
            }));
        Ok(CommandReply::Schedule(schedule))
    }

    /// Send the current step right now. Leaves the schedule as it is.
    fn send_manual(&self, cmd: SendManualNotification) -> CommandResult {
        let schedule = self.scheduling.get(cmd.schedule_id)?;
        if schedule.status().is_terminal() {
            return Err(NotificationError::InvalidTransition {
                status: schedule.status().to_string(),
                action: "send a manual notification".to_string(),
            });
        }

        let now = self.clock.now();
        let attempt = self.sender.send_for(&schedule, now)?;
        self.events
            .publish(&OutreachEvent::ContactAttempted(attempt.to_event(true, now)));
        info!(
            schedule_id = %cmd.schedule_id,
            succeeded = attempt.succeeded(),
            "manual notification attempted"
        );
        Ok(CommandReply::Attempt(attempt))
    }

    fn run_sweep(&self) -> CommandResult {
        self.run_driver.run().map(CommandReply::Sweep)
    }

    fn bulk_schedule(&self, cmd: BulkScheduleContacts) -> CommandResult {
        Ok(CommandReply::Enrollment(self.bulk.enroll(&cmd.contract_ids)))
    }

    fn bulk_schedule_overdue(&self) -> CommandResult {
        self.bulk.enroll_overdue().map(CommandReply::Enrollment)
    }

    fn set_pending_call_done(&self, cmd: SetPendingCallDone) -> CommandResult {
        self.tracker.resolve(cmd.call_id).map(CommandReply::PendingCall)
    }

    fn create_message(&self, cmd: CreateMessage) -> CommandResult {
        let message = notifyflow_outreach::Message::new(
            cmd.channel,
            cmd.subject,
            cmd.content,
            cmd.is_default,
            self.clock.now(),
        )?;
        self.messages.insert(&message)?;
        Ok(CommandReply::Message(message))
    }

    fn update_message(&self, cmd: UpdateMessage) -> CommandResult {
        let mut message = self
            .messages
            .get(cmd.message_id)?
            .ok_or_else(|| NotificationError::not_found(format!("message {}", cmd.message_id)))?;
        message.update(cmd.subject, cmd.content, cmd.is_default, self.clock.now())?;
        self.messages.update(&message)?;
        Ok(CommandReply::Message(message))
    }

    /// Refused while any registered flow step still points at the message.
    fn delete_message(&self, cmd: DeleteMessage) -> CommandResult {
        if self.flows.references_message(cmd.message_id)? {
            return Err(NotificationError::Conflict(format!(
                "message {} is referenced by a flow step",
                cmd.message_id
            )));
        }
        self.messages.delete(cmd.message_id)?;
        Ok(CommandReply::Done)
    }

    fn update_schedule(&self, cmd: UpdateContactSchedule) -> CommandResult {
        self.scheduling
            .reschedule(cmd.schedule_id, cmd.next_action_at)
            .map(CommandReply::Schedule)
    }

    fn delete_schedule(&self, cmd: DeleteContactSchedule) -> CommandResult {
        self.scheduling
            .cancel(cmd.schedule_id, "deleted")
            .map(CommandReply::Schedule)
    }
}

fn misrouted(kind: impl MessageKind) -> NotificationError {
    NotificationError::Configuration(format!("message `{}` reached the wrong handler", kind.name()))
}

/// Bind one command kind to the `CommandHandlers` method that serves it.
macro_rules! route_command {
    ($builder:expr, $handlers:expr, $variant:ident, |$h:ident, $cmd:pat_param| $body:expr) => {{
        let $h = Arc::clone(&$handlers);
        $builder.register(
            NotificationCommandKind::$variant,
            move |message: NotificationCommand| -> CommandResult {
                match message {
                    NotificationCommand::$variant($cmd) => $body,
                    other => Err(misrouted(notifyflow_events::Message::kind(&other))),
                }
            },
        )?;
    }};
}

pub fn command_bus(handlers: Arc<CommandHandlers>) -> NotificationResult<CommandBus> {
    let mut builder: MessageBusBuilder<NotificationCommand, CommandReply, NotificationError> =
        MessageBusBuilder::new("commands");

    route_command!(builder, handlers, CreateContactSchedule, |h, cmd| h.create_schedule(cmd));
    route_command!(builder, handlers, AdvanceContactStep, |h, cmd| h.advance_step(cmd));
    route_command!(builder, handlers, RecordContactSent, |h, cmd| h.record_contact_sent(cmd));
    route_command!(builder, handlers, SendManualNotification, |h, cmd| h.send_manual(cmd));
    route_command!(builder, handlers, RunAutomatedNotifications, |h, _cmd| h.run_sweep());
    route_command!(builder, handlers, BulkScheduleContacts, |h, cmd| h.bulk_schedule(cmd));
    route_command!(builder, handlers, BulkScheduleOverdue, |h, _cmd| h.bulk_schedule_overdue());
    route_command!(builder, handlers, SetPendingCallDone, |h, cmd| h.set_pending_call_done(cmd));
    route_command!(builder, handlers, CreateMessage, |h, cmd| h.create_message(cmd));
    route_command!(builder, handlers, UpdateMessage, |h, cmd| h.update_message(cmd));
    route_command!(builder, handlers, DeleteMessage, |h, cmd| h.delete_message(cmd));
    route_command!(builder, handlers, UpdateContactSchedule, |h, cmd| h.update_schedule(cmd));
    route_command!(builder, handlers, DeleteContactSchedule, |h, cmd| h.delete_schedule(cmd));

    Ok(builder.build_exhaustive()?)
}

/// Read side. Never writes.
pub struct QueryHandlers {
    pub(crate) schedules: Arc<dyn ContactScheduleRepo>,
    pub(crate) tracker: Arc<PendingCallTracker>,
}

pub fn query_bus(handlers: Arc<QueryHandlers>) -> NotificationResult<QueryBus> {
    let mut builder: MessageBusBuilder<NotificationQuery, QueryReply, NotificationError> =
        MessageBusBuilder::new("queries");

    let h = Arc::clone(&handlers);
    builder.register(
        NotificationQueryKind::ListPendingSchedules,
        move |query: NotificationQuery| -> NotificationResult<QueryReply> {
            match query {
                NotificationQuery::ListPendingSchedules(filter) => {
                    Ok(QueryReply::Schedules(h.schedules.list(&filter)?))
                }
                other => Err(misrouted(notifyflow_events::Message::kind(&other))),
            }
        },
    )?;

    let h = Arc::clone(&handlers);
    builder.register(
        NotificationQueryKind::ListPendingCalls,
        move |query: NotificationQuery| -> NotificationResult<QueryReply> {
            match query {
                NotificationQuery::ListPendingCalls(filter) => {
                    h.tracker.list(&filter).map(QueryReply::PendingCalls)
                }
                other => Err(misrouted(notifyflow_events::Message::kind(&other))),
            }
        },
    )?;

    let h = Arc::clone(&handlers);
    builder.register(
        NotificationQueryKind::GetPendingCall,
        move |query: NotificationQuery| -> NotificationResult<QueryReply> {
            match query {
                NotificationQuery::GetPendingCall(call_id) => {
                    h.tracker.get(call_id).map(QueryReply::PendingCall)
                }
                other => Err(misrouted(notifyflow_events::Message::kind(&other))),
            }
        },
    )?;

    Ok(builder.build_exhaustive()?)
}

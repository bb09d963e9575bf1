//! Commands accepted by the command bus, and their replies.

use chrono::{DateTime, Utc};

use notifyflow_core::{ContractId, FlowConfigId, MessageId, PatientId, PendingCallId, ScheduleId};
use notifyflow_events::{Message, MessageKind};
use notifyflow_outreach::{Channel, ContactSchedule, PendingCall, StepOutcome};

use crate::services::{BulkEnrollmentReport, DeliveryAttempt, SweepReport};

/// Command: CreateContactSchedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContactSchedule {
    pub patient_id: PatientId,
    pub contract_id: ContractId,
    pub flow_config_id: FlowConfigId,
}

/// Command: AdvanceContactStep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceContactStep {
    pub schedule_id: ScheduleId,
    pub outcome: StepOutcome,
}

/// Command: RecordContactSent.
///
/// A contact made outside the sweep. Always recorded in history; if the
/// schedule is DUE on that very step it also advances as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContactSent {
    pub schedule_id: ScheduleId,
    pub step_index: u32,
    pub channel: Channel,
}

/// Command: SendManualNotification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendManualNotification {
    pub schedule_id: ScheduleId,
}

/// Command: RunAutomatedNotifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAutomatedNotifications;

/// Command: BulkScheduleContacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkScheduleContacts {
    pub contract_ids: Vec<ContractId>,
}

/// Command: BulkScheduleOverdue. Enrols every currently overdue contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkScheduleOverdue;

/// Command: SetPendingCallDone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPendingCallDone {
    pub call_id: PendingCallId,
}

/// Command: CreateMessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMessage {
    pub channel: Channel,
    pub subject: Option<String>,
    pub content: String,
    pub is_default: bool,
}

/// Command: UpdateMessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub message_id: MessageId,
    pub subject: Option<String>,
    pub content: String,
    pub is_default: bool,
}

/// Command: DeleteMessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMessage {
    pub message_id: MessageId,
}

/// Command: UpdateContactSchedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateContactSchedule {
    pub schedule_id: ScheduleId,
    pub next_action_at: DateTime<Utc>,
}

/// Command: DeleteContactSchedule. Cancels; history keeps its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteContactSchedule {
    pub schedule_id: ScheduleId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationCommand {
    CreateContactSchedule(CreateContactSchedule),
    AdvanceContactStep(AdvanceContactStep),
    RecordContactSent(RecordContactSent),
    SendManualNotification(SendManualNotification),
    RunAutomatedNotifications(RunAutomatedNotifications),
    BulkScheduleContacts(BulkScheduleContacts),
    BulkScheduleOverdue(BulkScheduleOverdue),
    SetPendingCallDone(SetPendingCallDone),
    CreateMessage(CreateMessage),
    UpdateMessage(UpdateMessage),
    DeleteMessage(DeleteMessage),
    UpdateContactSchedule(UpdateContactSchedule),
    DeleteContactSchedule(DeleteContactSchedule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCommandKind {
    CreateContactSchedule,
    AdvanceContactStep,
    RecordContactSent,
    SendManualNotification,
    RunAutomatedNotifications,
    BulkScheduleContacts,
    BulkScheduleOverdue,
    SetPendingCallDone,
    CreateMessage,
    UpdateMessage,
    DeleteMessage,
    UpdateContactSchedule,
    DeleteContactSchedule,
}

impl MessageKind for NotificationCommandKind {
    fn all() -> &'static [Self] {
        &[
            Self::CreateContactSchedule,
            Self::AdvanceContactStep,
            Self::RecordContactSent,
            Self::SendManualNotification,
            Self::RunAutomatedNotifications,
            Self::BulkScheduleContacts,
            Self::BulkScheduleOverdue,
            Self::SetPendingCallDone,
            Self::CreateMessage,
            Self::UpdateMessage,
            Self::DeleteMessage,
            Self::UpdateContactSchedule,
            Self::DeleteContactSchedule,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            Self::CreateContactSchedule => "create_contact_schedule",
            Self::AdvanceContactStep => "advance_contact_step",
            Self::RecordContactSent => "record_contact_sent",
            Self::SendManualNotification => "send_manual_notification",
            Self::RunAutomatedNotifications => "run_automated_notifications",
            Self::BulkScheduleContacts => "bulk_schedule_contacts",
            Self::BulkScheduleOverdue => "bulk_schedule_overdue",
            Self::SetPendingCallDone => "set_pending_call_done",
            Self::CreateMessage => "create_message",
            Self::UpdateMessage => "update_message",
            Self::DeleteMessage => "delete_message",
            Self::UpdateContactSchedule => "update_contact_schedule",
            Self::DeleteContactSchedule => "delete_contact_schedule",
        }
    }
}

impl Message for NotificationCommand {
    type Kind = NotificationCommandKind;

    fn kind(&self) -> NotificationCommandKind {
        match self {
            Self::CreateContactSchedule(_) => NotificationCommandKind::CreateContactSchedule,
            Self::AdvanceContactStep(_) => NotificationCommandKind::AdvanceContactStep,
            Self::RecordContactSent(_) => NotificationCommandKind::RecordContactSent,
            Self::SendManualNotification(_) => NotificationCommandKind::SendManualNotification,
            Self::RunAutomatedNotifications(_) => {
                NotificationCommandKind::RunAutomatedNotifications
            }
            Self::BulkScheduleContacts(_) => NotificationCommandKind::BulkScheduleContacts,
            Self::BulkScheduleOverdue(_) => NotificationCommandKind::BulkScheduleOverdue,
            Self::SetPendingCallDone(_) => NotificationCommandKind::SetPendingCallDone,
            Self::CreateMessage(_) => NotificationCommandKind::CreateMessage,
            Self::UpdateMessage(_) => NotificationCommandKind::UpdateMessage,
            Self::DeleteMessage(_) => NotificationCommandKind::DeleteMessage,
            Self::UpdateContactSchedule(_) => NotificationCommandKind::UpdateContactSchedule,
            Self::DeleteContactSchedule(_) => NotificationCommandKind::DeleteContactSchedule,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Schedule(ContactSchedule),
    Attempt(DeliveryAttempt),
    Sweep(SweepReport),
    Enrollment(BulkEnrollmentReport),
    PendingCall(PendingCall),
    Message(notifyflow_outreach::Message),
    /// Accepted, nothing to return.
    Done,
}

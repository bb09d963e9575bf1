//! Queries accepted by the query bus. Read-only.

use notifyflow_core::PendingCallId;
use notifyflow_events::{Message, MessageKind};
use notifyflow_outreach::{ContactSchedule, PendingCall};

use crate::repos::{PendingCallFilter, ScheduleFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationQuery {
    ListPendingSchedules(ScheduleFilter),
    ListPendingCalls(PendingCallFilter),
    GetPendingCall(PendingCallId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationQueryKind {
    ListPendingSchedules,
    ListPendingCalls,
    GetPendingCall,
}

impl MessageKind for NotificationQueryKind {
    fn all() -> &'static [Self] {
        &[
            NotificationQueryKind::ListPendingSchedules,
            NotificationQueryKind::ListPendingCalls,
            NotificationQueryKind::GetPendingCall,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            NotificationQueryKind::ListPendingSchedules => "list_pending_schedules",
            NotificationQueryKind::ListPendingCalls => "list_pending_calls",
            NotificationQueryKind::GetPendingCall => "get_pending_call",
        }
    }
}

impl Message for NotificationQuery {
    type Kind = NotificationQueryKind;

    fn kind(&self) -> NotificationQueryKind {
        match self {
            NotificationQuery::ListPendingSchedules(_) => NotificationQueryKind::ListPendingSchedules,
            NotificationQuery::ListPendingCalls(_) => NotificationQueryKind::ListPendingCalls,
            NotificationQuery::GetPendingCall(_) => NotificationQueryKind::GetPendingCall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    Schedules(Vec<ContactSchedule>),
    PendingCalls(Vec<PendingCall>),
    PendingCall(PendingCall),
}

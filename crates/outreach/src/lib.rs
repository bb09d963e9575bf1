//! Outreach domain: contact flows for patients with overdue installments.
//!
//! Deterministic domain logic only (no IO, no clocks read implicitly, no
//! storage). Every timestamp is passed in by the caller.

pub mod events;
pub mod flow;
pub mod history;
pub mod message;
pub mod party;
pub mod pending_call;
pub mod schedule;

pub use events::{
    CallResolved, ContactAttempted, OutreachEvent, OutreachEventKind, PendingCallOpened,
};
pub use flow::{Channel, FlowConfig, FlowStepConfig};
pub use history::{ContactHistory, ContactOutcome};
pub use message::Message;
pub use party::{Contract, Installment, Patient};
pub use pending_call::{PendingCall, PendingCallStatus};
pub use schedule::{
    AdvanceSchedule, ContactSchedule, EnrollSchedule, FailureKind, RescheduleContact,
    ScheduleCommand, ScheduleEnrolled, ScheduleEvent, ScheduleRescheduled, ScheduleStatus,
    StepAdvanced, StepOutcome, StepPlan,
};

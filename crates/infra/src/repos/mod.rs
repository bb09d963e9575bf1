//! Repository contracts consumed by the services, with in-memory
//! implementations for tests and development.
//!
//! Concrete storage lives outside this crate. Every write that must be
//! atomic (schedule claim, open pending call, active enrolment) is a single
//! trait method so a database-backed implementation can map it onto one
//! conditional update.

pub mod billing;
pub mod history;
pub mod messages;
pub mod pending_calls;
pub mod schedules;
mod table;

pub use billing::{ContractRepo, InMemoryBilling, InstallmentRepo, PatientRepo};
pub use history::{ContactHistoryRepo, InMemoryContactHistoryRepo};
pub use messages::{FlowStepConfigRepo, InMemoryFlowRepo, InMemoryMessageRepo, MessageRepo};
pub use pending_calls::{InMemoryPendingCallRepo, PendingCallFilter, PendingCallRepo};
pub use schedules::{ContactScheduleRepo, InMemoryContactScheduleRepo, ScheduleFilter};

//! `notifyflow-core`: building blocks shared by the outreach domain.
//!
//! Nothing in here performs IO. Aggregates, entities, identifiers and the
//! domain error model live here so every other crate speaks the same types.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ContractId, FlowConfigId, HistoryEntryId, InstallmentId, MessageId, PatientId, PendingCallId,
    ScheduleId, WorkerId,
};
pub use value_object::ValueObject;

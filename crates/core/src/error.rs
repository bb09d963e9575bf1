//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Delivery, storage and dispatch
/// failures are modelled by the layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed flow definition).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The state machine does not accept this input in its current state.
    #[error("invalid transition: cannot {action} while {status}")]
    InvalidTransition { status: String, action: String },

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflicting write (stale version, referenced record, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An active schedule already exists for the same patient and contract.
    #[error("duplicate enrollment: {0}")]
    DuplicateEnrollment(String),

    /// An open pending call already exists for the schedule.
    #[error("pending call already open: {0}")]
    AlreadyOpen(String),

    /// The pending call was already resolved.
    #[error("pending call already resolved: {0}")]
    AlreadyResolved(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(status: impl core::fmt::Display, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            status: status.to_string(),
            action: action.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn duplicate_enrollment(msg: impl Into<String>) -> Self {
        Self::DuplicateEnrollment(msg.into())
    }

    pub fn already_open(msg: impl Into<String>) -> Self {
        Self::AlreadyOpen(msg.into())
    }

    pub fn already_resolved(msg: impl Into<String>) -> Self {
        Self::AlreadyResolved(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Conflict-class errors are reported to callers as a no-op with a reason.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_)
                | Self::DuplicateEnrollment(_)
                | Self::AlreadyOpen(_)
                | Self::AlreadyResolved(_)
        )
    }
}

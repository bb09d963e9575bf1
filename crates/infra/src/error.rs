//! Error types of the application layer.
//!
//! `NotificationError` is what callers of the facade and the buses see.
//! Domain, repository, routing and delivery failures all map into it so a
//! caller can branch on the class of failure without knowing which layer
//! produced it.

use std::time::Duration;

use thiserror::Error;

use notifyflow_core::DomainError;
use notifyflow_events::BusError;
use notifyflow_outreach::{Channel, FailureKind};

use crate::config::SettingsError;

/// Repository failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Stale version or a uniqueness rule was violated.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// An open pending call already exists for the schedule.
    #[error("open pending call already exists for schedule {0}")]
    AlreadyOpen(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl RepoError {
    pub(crate) fn poisoned() -> Self {
        RepoError::Storage("lock poisoned".to_string())
    }
}

/// Result of one failed notifier call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Gateway hiccup; the same message may succeed later.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// No answer, invalid recipient, or rejected content.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// The notifier did not answer within the send timeout.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// No notifier is registered for the step's channel.
    #[error("no notifier registered for channel {0}")]
    NoNotifier(Channel),
}

impl DeliveryError {
    pub fn transient(msg: impl Into<String>) -> Self {
        DeliveryError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        DeliveryError::Permanent(msg.into())
    }

    /// Timeouts are retried; a missing notifier never fixes itself.
    pub fn kind(&self) -> FailureKind {
        match self {
            DeliveryError::Transient(_) | DeliveryError::Timeout(_) => FailureKind::Transient,
            DeliveryError::Permanent(_) | DeliveryError::NoNotifier(_) => FailureKind::Permanent,
        }
    }
}

/// Error returned by the buses, the facade and the services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// Wiring error detected at startup (duplicate or missing handler, bad flow).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no handler registered for message `{0}`")]
    UnroutableMessage(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transition: cannot {action} while {status}")]
    InvalidTransition { status: String, action: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("duplicate enrollment: {0}")]
    DuplicateEnrollment(String),

    #[error("pending call already open: {0}")]
    AlreadyOpen(String),

    #[error("pending call already resolved: {0}")]
    AlreadyResolved(String),

    /// Channel delivery failed but may succeed on retry.
    #[error("transient delivery failure: {0}")]
    TransientFailure(String),

    /// Channel delivery failed for good; escalate, do not retry.
    #[error("permanent delivery failure: {0}")]
    PermanentFailure(String),

    #[error("repository error: {0}")]
    Repository(String),
}

impl NotificationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        NotificationError::NotFound(what.into())
    }

    /// Conflict-class outcomes are reported to callers as a no-op with a reason.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            NotificationError::Conflict(_)
                | NotificationError::DuplicateEnrollment(_)
                | NotificationError::AlreadyOpen(_)
                | NotificationError::AlreadyResolved(_)
        )
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, NotificationError::InvalidTransition { .. })
    }
}

impl From<DomainError> for NotificationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => NotificationError::Validation(msg),
            DomainError::InvalidTransition { status, action } => {
                NotificationError::InvalidTransition { status, action }
            }
            DomainError::NotFound => NotificationError::NotFound("record".to_string()),
            DomainError::Conflict(msg) => NotificationError::Conflict(msg),
            DomainError::DuplicateEnrollment(msg) => NotificationError::DuplicateEnrollment(msg),
            DomainError::AlreadyOpen(msg) => NotificationError::AlreadyOpen(msg),
            DomainError::AlreadyResolved(msg) => NotificationError::AlreadyResolved(msg),
        }
    }
}

impl From<RepoError> for NotificationError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(what) => NotificationError::NotFound(what),
            RepoError::Conflict(msg) => NotificationError::Conflict(msg),
            RepoError::AlreadyOpen(msg) => NotificationError::AlreadyOpen(msg),
            RepoError::Storage(msg) => NotificationError::Repository(msg),
        }
    }
}

impl From<BusError> for NotificationError {
    fn from(value: BusError) -> Self {
        match value {
            BusError::Configuration(msg) => NotificationError::Configuration(msg),
            BusError::UnroutableMessage(name) => NotificationError::UnroutableMessage(name),
        }
    }
}

impl From<SettingsError> for NotificationError {
    fn from(value: SettingsError) -> Self {
        NotificationError::Configuration(value.to_string())
    }
}

impl From<DeliveryError> for NotificationError {
    fn from(value: DeliveryError) -> Self {
        match value.kind() {
            FailureKind::Transient => NotificationError::TransientFailure(value.to_string()),
            FailureKind::Permanent => NotificationError::PermanentFailure(value.to_string()),
        }
    }
}

pub type NotificationResult<T> = Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_errors_classify_for_retry() {
        assert_eq!(
            DeliveryError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            DeliveryError::NoNotifier(Channel::Voice).kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn domain_and_repo_errors_keep_their_class() {
        let err: NotificationError = DomainError::invalid_transition("done", "cancel").into();
        assert!(err.is_invalid_transition());

        let err: NotificationError = RepoError::AlreadyOpen("s-1".into()).into();
        assert!(err.is_conflict());

        let err: NotificationError = DeliveryError::Timeout(Duration::from_secs(2)).into();
        assert!(matches!(err, NotificationError::TransientFailure(_)));

        let err: NotificationError = BusError::UnroutableMessage("get_pending_call").into();
        assert_eq!(err, NotificationError::UnroutableMessage("get_pending_call"));
    }
}

use chrono::{DateTime, Utc};

use crate::MessageKind;

/// A domain event: an immutable fact published after a state change.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Discriminant used to route the event to its subscribers.
    type Kind: MessageKind;

    fn kind(&self) -> Self::Kind;

    /// Stable event name (e.g. "outreach.schedule.step_advanced").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

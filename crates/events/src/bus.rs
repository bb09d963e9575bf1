//! Command/query bus: exactly one handler per message kind.
//!
//! Registration happens once, through [`MessageBusBuilder`]. A second handler
//! for the same kind is a startup error; once built, the registry is frozen
//! and shared by reference (usually inside an `Arc`) with whoever dispatches.
//! Commands and queries use two separate bus instances so the write and read
//! paths can never collide.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::{Message, MessageHandler, MessageKind};

/// Routing failures. Both indicate a programming error, not a runtime fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Duplicate or missing registration detected while building a bus.
    #[error("bus configuration error: {0}")]
    Configuration(String),

    /// A message was dispatched with no handler registered for its kind.
    #[error("no handler registered for message `{0}`")]
    UnroutableMessage(&'static str),
}

type BoxedHandler<M, R, E> = Arc<dyn MessageHandler<M, R, E>>;

/// Collects handler registrations before the bus is frozen.
pub struct MessageBusBuilder<M, R, E>
where
    M: Message,
{
    label: &'static str,
    handlers: HashMap<M::Kind, BoxedHandler<M, R, E>>,
}

impl<M, R, E> MessageBusBuilder<M, R, E>
where
    M: Message,
{
    /// `label` names the bus in logs ("commands", "queries").
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            handlers: HashMap::new(),
        }
    }

    /// Bind `handler` to `kind`. Fails if the kind already has a handler.
    pub fn register<H>(&mut self, kind: M::Kind, handler: H) -> Result<&mut Self, BusError>
    where
        H: MessageHandler<M, R, E> + 'static,
    {
        if self.handlers.contains_key(&kind) {
            return Err(BusError::Configuration(format!(
                "{} bus: handler already registered for `{}`",
                self.label,
                kind.name()
            )));
        }
        self.handlers.insert(kind, Arc::new(handler));
        Ok(self)
    }

    /// Freeze the registry as-is. Unregistered kinds fail at dispatch time
    /// with [`BusError::UnroutableMessage`].
    pub fn build(self) -> MessageBus<M, R, E> {
        MessageBus {
            label: self.label,
            handlers: self.handlers,
        }
    }

    /// Freeze the registry, requiring a handler for every kind.
    pub fn build_exhaustive(self) -> Result<MessageBus<M, R, E>, BusError> {
        let missing: Vec<&'static str> = <M::Kind as MessageKind>::all()
            .iter()
            .filter(|kind| !self.handlers.contains_key(*kind))
            .map(|kind| kind.name())
            .collect();

        if !missing.is_empty() {
            return Err(BusError::Configuration(format!(
                "{} bus: no handler registered for {}",
                self.label,
                missing.join(", ")
            )));
        }

        Ok(self.build())
    }
}

/// Frozen, synchronous message router.
pub struct MessageBus<M, R, E>
where
    M: Message,
{
    label: &'static str,
    handlers: HashMap<M::Kind, BoxedHandler<M, R, E>>,
}

impl<M, R, E> MessageBus<M, R, E>
where
    M: Message,
    E: From<BusError>,
{
    /// Route `message` to its handler and return the handler's result
    /// unchanged.
    pub fn dispatch(&self, message: M) -> Result<R, E> {
        let kind = message.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(BusError::UnroutableMessage(kind.name()))?;

        debug!(bus = self.label, message = kind.name(), "dispatching");
        handler.handle(message)
    }
}

impl<M, R, E> MessageBus<M, R, E>
where
    M: Message,
{
    pub fn handles(&self, kind: M::Kind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<M, R, E> core::fmt::Debug for MessageBus<M, R, E>
where
    M: Message,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<&'static str> = self.handlers.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("MessageBus")
            .field("label", &self.label)
            .field("kinds", &kinds)
            .finish()
    }
}

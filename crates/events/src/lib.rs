//! Dispatch mechanics: command/query buses and domain-event fan-out.
//!
//! This crate knows nothing about outreach. It routes typed messages to
//! exactly one handler and fans events out to any number of subscribers.

pub mod bus;
pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod message;

pub use bus::{BusError, MessageBus, MessageBusBuilder};
pub use dispatcher::{EventDispatcher, EventSubscriber, PublishReport};
pub use event::Event;
pub use handler::{MessageHandler, execute};
pub use message::{Message, MessageKind};

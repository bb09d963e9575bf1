//! Infrastructure layer: repositories, delivery, services and wiring.
//!
//! Callers normally build a [`NotificationModule`] and talk to its
//! [`NotificationFacade`]; everything else is public so a deployment can swap
//! a repository or a notifier without forking the wiring.

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod module;
pub mod notifier;
pub mod queries;
pub mod repos;
pub mod services;
pub mod subscribers;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffStrategy, NotificationSettings, RetryPolicy, SettingsError};
pub use error::{DeliveryError, NotificationError, NotificationResult, RepoError};
pub use facade::NotificationFacade;
pub use module::{NotificationModule, Repositories};
pub use notifier::{LoggingNotifier, Notifier, NotifierRegistry, PlaceholderRenderer};

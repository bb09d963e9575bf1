//! Aggregate traits for state machines that decide before they mutate.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of transitions applied since creation.
    ///
    /// Repositories compare this against the stored version when saving, so a
    /// stale copy can never overwrite a newer one.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation used when persisting an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (first insert, administrative overrides).
    Any,
    /// Require the stored aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale write (expected: {self:?}, stored: {actual})"
            )))
        }
    }
}

/// Decide/apply split for state machines.
///
/// - `handle(&self, cmd)` validates the command against the current state and
///   returns the events describing the transition. It never mutates.
/// - `apply(&mut self, event)` evolves state from one event.
///
/// Because every check happens in `handle`, a rejected command leaves the
/// aggregate untouched: there is no partial write to undo.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

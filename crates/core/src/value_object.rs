//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Flow steps, retry policies and delivery outcomes are compared by their
/// attributes only. Once a flow step is referenced by an active schedule it
/// is never edited in place; a new flow version replaces it.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

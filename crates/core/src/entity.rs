//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Pending calls, history entries and outbound messages are entities: two
/// records with equal fields but different ids are different records.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

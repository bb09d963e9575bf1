use core::fmt::Debug;
use core::hash::Hash;

/// Enumerated discriminant of a message (or event) family.
///
/// Handlers are keyed by kind rather than by runtime type. `all()` lists every
/// variant so a registry can verify at startup that nothing was left
/// unrouted.
pub trait MessageKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every kind in the family, in declaration order.
    fn all() -> &'static [Self];

    /// Stable name used in logs and error messages.
    fn name(self) -> &'static str;
}

/// A routable message (command or query).
///
/// Messages own their data and cross thread boundaries when a sweep fans out
/// across workers, hence `Send + Sync + 'static`.
pub trait Message: Clone + Debug + Send + Sync + 'static {
    type Kind: MessageKind;

    fn kind(&self) -> Self::Kind;
}

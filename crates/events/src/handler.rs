use notifyflow_core::Aggregate;

use crate::Message;

/// Handles one message kind and returns its reply.
///
/// Output and error are trait parameters so a single bus can hold handlers
/// of different concrete types behind one trait object. Closures of the
/// right shape are handlers too, which keeps test wiring short.
pub trait MessageHandler<M, R, E>: Send + Sync
where
    M: Message,
{
    fn handle(&self, message: M) -> Result<R, E>;
}

impl<M, R, E, F> MessageHandler<M, R, E> for F
where
    M: Message,
    F: Fn(M) -> Result<R, E> + Send + Sync,
{
    fn handle(&self, message: M) -> Result<R, E> {
        self(message)
    }
}

/// Run a command against an aggregate: decide, then apply.
///
/// `handle` runs first and may reject; only accepted events are applied, so a
/// rejected command never leaves the aggregate half-updated.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}

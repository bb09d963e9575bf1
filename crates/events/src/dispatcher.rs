//! In-process domain-event fan-out.
//!
//! Subscribers run synchronously, in subscription order, inside the call that
//! published the event. Fan-out is best-effort: a subscriber that fails (or
//! panics) is logged and skipped, the remaining subscribers still run, and
//! the publisher never sees the failure. A history write that fails must not
//! undo a delivery that already happened.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::{Event, MessageKind};

/// Reacts to published events of the kinds it was subscribed to.
pub trait EventSubscriber<E>: Send + Sync
where
    E: Event,
{
    /// Name used in logs when the subscriber fails.
    fn name(&self) -> &str;

    fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

type SubscriberList<E> = Vec<Arc<dyn EventSubscriber<E>>>;

/// Publish/subscribe registry keyed by event kind.
pub struct EventDispatcher<E>
where
    E: Event,
{
    subscribers: RwLock<HashMap<E::Kind, SubscriberList<E>>>,
}

impl<E> EventDispatcher<E>
where
    E: Event,
{
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Append `subscriber` to the list for `kind`. Any number of subscribers
    /// may share a kind; they run in the order they subscribed.
    pub fn subscribe(&self, kind: E::Kind, subscriber: Arc<dyn EventSubscriber<E>>) {
        match self.subscribers.write() {
            Ok(mut subs) => subs.entry(kind).or_default().push(subscriber),
            Err(poisoned) => poisoned.into_inner().entry(kind).or_default().push(subscriber),
        }
    }

    /// Subscribe the same subscriber to several kinds.
    pub fn subscribe_all(&self, kinds: &[E::Kind], subscriber: Arc<dyn EventSubscriber<E>>) {
        for kind in kinds {
            self.subscribe(*kind, subscriber.clone());
        }
    }

    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.snapshot(kind).len()
    }

    /// Deliver `event` to every current subscriber of its kind.
    pub fn publish(&self, event: &E) -> PublishReport {
        let kind = event.kind();
        // Snapshot so subscribers can publish follow-up events without
        // re-entering the lock.
        let subscribers = self.snapshot(kind);
        let mut report = PublishReport::default();

        for subscriber in subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handle(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    warn!(
                        subscriber = subscriber.name(),
                        event = event.event_type(),
                        error = %error,
                        "event subscriber failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        subscriber = subscriber.name(),
                        event = event.event_type(),
                        "event subscriber panicked"
                    );
                }
            }
        }

        debug!(
            event = event.event_type(),
            kind = kind.name(),
            delivered = report.delivered,
            failed = report.failed,
            "event published"
        );
        report
    }

    /// Publish a batch of events in order.
    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a E>) -> PublishReport
    where
        E: 'a,
    {
        events
            .into_iter()
            .fold(PublishReport::default(), |mut acc, ev| {
                let r = self.publish(ev);
                acc.delivered += r.delivered;
                acc.failed += r.failed;
                acc
            })
    }

    fn snapshot(&self, kind: E::Kind) -> SubscriberList<E> {
        let subs = match self.subscribers.read() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.get(&kind).cloned().unwrap_or_default()
    }
}

impl<E> Default for EventDispatcher<E>
where
    E: Event,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for EventDispatcher<E>
where
    E: Event,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let counts: Vec<(&'static str, usize)> = <E::Kind as MessageKind>::all()
            .iter()
            .map(|k| (k.name(), self.subscriber_count(*k)))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("subscribers", &counts)
            .finish()
    }
}

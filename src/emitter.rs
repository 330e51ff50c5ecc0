//! Publish/subscribe registry for [`IrcEvent`]s.
//!
//! Subscribers register a callback for one [`EventKind`] (or for every kind)
//! and get back a [`SubscriptionId`] that removes exactly that callback.
//! Callbacks run synchronously, in registration order, on whichever task
//! published the event. The registry lock is released before any callback
//! runs, so a callback may subscribe, unsubscribe or call back into the
//! client that owns the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{EventKind, IrcEvent};

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&IrcEvent) + Send + Sync>;

/// Identity of one registered callback, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    by_kind: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    any: Vec<(SubscriptionId, Handler)>,
}

/// Registry mapping event kinds to ordered subscriber lists.
#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&IrcEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock()
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register `handler` for every event. Wildcard handlers run after the
    /// handlers registered for the specific kind.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&IrcEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().any.push((id, Arc::new(handler)));
        id
    }

    /// Remove the callback registered under `id`. Returns `false` if it was
    /// already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.any.len();
        subscribers.any.retain(|(sid, _)| *sid != id);
        if subscribers.any.len() != before {
            return true;
        }
        for list in subscribers.by_kind.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            if list.len() != before {
                return true;
            }
        }
        false
    }

    /// Number of callbacks that would receive an event of `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let subscribers = self.lock();
        subscribers.by_kind.get(&kind).map_or(0, Vec::len) + subscribers.any.len()
    }

    /// Deliver `event` to every matching callback.
    pub fn emit(&self, event: &IrcEvent) {
        let handlers: Vec<Handler> = {
            let subscribers = self.lock();
            subscribers
                .by_kind
                .get(&event.kind())
                .into_iter()
                .flatten()
                .chain(subscribers.any.iter())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Forward every event into a bounded channel.
    ///
    /// When the receiver falls behind, events are dropped (with a warning
    /// logged) rather than blocking the publisher. Capacity is clamped to 1.
    pub fn channel(&self, capacity: usize) -> (SubscriptionId, mpsc::Receiver<IrcEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.on_any(move |event| match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(kind = %dropped.kind(), "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        });
        (id, rx)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.lock();
        let total: usize =
            subscribers.by_kind.values().map(Vec::len).sum::<usize>() + subscribers.any.len();
        f.debug_struct("EventRegistry")
            .field("subscribers", &total)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_for_make = Arc::clone(&log);
        let make = move |tag: &str| -> Handler {
            let log = Arc::clone(&log_for_make);
            let tag = tag.to_owned();
            Arc::new(move |event: &IrcEvent| {
                log.lock().unwrap().push(format!("{tag}:{}", event.kind()));
            })
        };
        (log, make)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = EventRegistry::new();
        let (log, make) = recorder();
        let first = make("first");
        let second = make("second");
        let any = make("any");
        registry.on_any(move |e| any(e));
        registry.on(EventKind::Connect, move |e| first(e));
        registry.on(EventKind::Connect, move |e| second(e));

        registry.emit(&IrcEvent::Connected);
        registry.emit(&IrcEvent::Disconnected);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:connect",
                "second:connect",
                "any:connect",
                "any:disconnect"
            ]
        );
    }

    #[test]
    fn off_removes_by_identity() {
        let registry = EventRegistry::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let id_a = registry.on(EventKind::Raw, move |e| a(e));
        registry.on(EventKind::Raw, move |e| b(e));

        assert!(registry.off(id_a));
        assert!(!registry.off(id_a));
        registry.emit(&IrcEvent::Raw("PING :x".into()));

        assert_eq!(*log.lock().unwrap(), vec!["b:raw"]);
        assert_eq!(registry.subscriber_count(EventKind::Raw), 1);
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = Arc::new(EventRegistry::new());
        let inner = Arc::clone(&registry);
        registry.on(EventKind::Connect, move |_| {
            inner.on(EventKind::Disconnect, |_| {});
        });
        registry.emit(&IrcEvent::Connected);
        assert_eq!(registry.subscriber_count(EventKind::Disconnect), 1);
    }

    #[tokio::test]
    async fn channel_forwards_and_drops_when_full() {
        let registry = EventRegistry::new();
        let (_id, mut rx) = registry.channel(1);
        registry.emit(&IrcEvent::Connected);
        registry.emit(&IrcEvent::Disconnected);

        assert_eq!(rx.recv().await, Some(IrcEvent::Connected));
        assert!(rx.try_recv().is_err());
    }
}

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use super::EventKind;
use super::WatchLogEvent;

type Callback = Arc<dyn Fn(&WatchLogEvent) + Send + Sync>;

/// Registration returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Process-wide publish/subscribe channel for watch lifecycle events.
///
/// Created once at server start and shared as `Arc<EventBus>`. Delivery is
/// synchronous on the publishing task: every subscriber registered when
/// `publish` is called runs before it returns. Callbacks must be quick; use
/// [`EventBus::subscribe_channel`] to move work onto another task.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<(u64, Callback)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().values().map(Vec::len).sum::<usize>())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe<F>(
        &self,
        kind: EventKind,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&WatchLogEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            debug!(?kind, "subscribe on closed event bus ignored");
        } else {
            self.subscribers
                .write()
                .entry(kind)
                .or_default()
                .push((id, Arc::new(callback)));
        }
        Subscription { kind, id }
    }

    /// Returns `true` if the subscription was still registered.
    pub fn unsubscribe(
        &self,
        subscription: &Subscription,
    ) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        before != list.len()
    }

    /// Forwards events of `kind` into an unbounded channel.
    ///
    /// The subscription is dropped lazily, on the first publish after the
    /// receiver is gone.
    pub fn subscribe_channel(
        self: &Arc<Self>,
        kind: EventKind,
    ) -> (Subscription, mpsc::UnboundedReceiver<WatchLogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::downgrade(self);
        let slot: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::new(parking_lot::Mutex::new(None));
        let slot_in_callback = slot.clone();

        let subscription = self.subscribe(kind, move |event| {
            if tx.send(event.clone()).is_err() {
                // Receiver dropped
                if let (Some(bus), Some(sub)) = (bus.upgrade(), slot_in_callback.lock().take()) {
                    bus.unsubscribe(&sub);
                }
            }
        });
        *slot.lock() = Some(subscription);
        (subscription, rx)
    }

    /// Delivers `event` to every subscriber of its kind and returns how many were
    /// invoked. Events published after [`EventBus::close`] are discarded.
    pub fn publish(
        &self,
        event: WatchLogEvent,
    ) -> usize {
        if self.closed.load(Ordering::Acquire) {
            trace!(?event, "event bus closed, dropping event");
            return 0;
        }

        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let callbacks: Vec<Callback> = match self.subscribers.read().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return 0,
        };
        for callback in &callbacks {
            callback(&event);
        }
        callbacks.len()
    }

    pub fn subscriber_count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.subscribers.read().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Drops all subscribers. Later publishes are discarded.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.subscribers.write().clear();
            debug!("event bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

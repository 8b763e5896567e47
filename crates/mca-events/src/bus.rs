//! Event bus with ordered synchronous handlers and async receivers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::dispatch::{DispatchReport, dispatch_all};
use crate::event::{Event, EventType};

/// Default channel capacity for async receivers.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Synchronous event handler.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registration handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    /// `None` matches every event type.
    event_type: Option<EventType>,
    handler: Handler,
}

struct Inner {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<Arc<Event>>,
}

/// In-process publish/subscribe channel.
///
/// Handlers run synchronously on the publisher's thread, in subscription
/// order. A handler that panics is isolated and dispatch continues with
/// the remaining handlers. Delivery is best-effort and at-most-once.
///
/// Handlers are invoked without the registry lock held, so a handler may
/// itself publish, subscribe or unsubscribe. Clones share the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus whose async channel holds `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                subscriptions: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Register `handler` for events of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(event_type), Arc::new(handler))
    }

    /// Register `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, event_type: Option<EventType>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = id.0, event_type = ?event_type, "Subscriber registered");
        self.lock().push(Subscription {
            id,
            event_type,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if removed {
            debug!(subscription = id.0, "Subscriber unregistered");
        }
        removed
    }

    /// Publish an event.
    ///
    /// Matching handlers are invoked in subscription order, then the event
    /// is sent to async receivers.
    pub fn publish(&self, event: Event) -> DispatchReport {
        trace!(event_type = %event.event_type, "Publishing event");

        let handlers: Vec<Handler> = self
            .lock()
            .iter()
            .filter(|s| s.event_type.as_ref().is_none_or(|t| *t == event.event_type))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        let report = dispatch_all(event.event_type.as_str(), handlers.iter(), |handler: &Handler| {
            handler(&event);
        });
        if report.failed > 0 {
            warn!(
                event_type = %event.event_type,
                failed = report.failed,
                "Event handlers panicked"
            );
        }

        if let Ok(receivers) = self.inner.sender.send(Arc::new(event)) {
            trace!(receivers, "Event broadcast to async receivers");
        }

        report
    }

    /// Receive events asynchronously.
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Number of synchronous subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("receiver_count", &self.inner.sender.receiver_count())
            .finish()
    }
}

/// Async receiver for events from the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<Event>>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` when the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver").finish_non_exhaustive()
    }
}

// ── Event router ──
//
// Fans inbound events out to every subscription whose pattern matches.
// Delivery never blocks: a full subscriber queue loses the event for
// that subscriber only, and a dropped receiver removes its route.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::event::Event;
use crate::topic::TopicPattern;

/// Per-subscription queue depth.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

struct Route {
    pattern: TopicPattern,
    tx: mpsc::Sender<Event>,
}

/// Pattern → bounded queue registry.
///
/// Shared behind an `Arc` by the transport read loop (which calls
/// [`route`](Self::route)) and every live [`Subscription`].
pub struct EventRouter {
    routes: DashMap<u64, Route>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a pattern and hand back its receiving end.
    pub fn subscribe(self: &Arc<Self>, pattern: impl Into<TopicPattern>) -> Subscription {
        let pattern = pattern.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.routes.insert(
            id,
            Route {
                pattern: pattern.clone(),
                tx,
            },
        );
        debug!(subscription = id, %pattern, "subscribed");

        Subscription {
            id,
            pattern,
            rx,
            router: Arc::downgrade(self),
        }
    }

    /// Deliver one event to every matching subscription.
    ///
    /// Returns how many queues accepted it.
    pub fn route(&self, event: &Event) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in &self.routes {
            let route = entry.value();
            if !route.pattern.matches(&event.topic) {
                continue;
            }
            match route.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        subscription = *entry.key(),
                        topic = %event.topic,
                        "subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal happens outside the iteration; DashMap shards are still locked inside it.
        for id in closed {
            self.routes.remove(&id);
        }

        trace!(topic = %event.topic, delivered, "routed event");
        delivered
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.routes.remove(&id).is_some() {
            debug!(subscription = id, "unsubscribed");
        }
    }

    /// Drop every route. Subscribers see end-of-stream once their queue drains.
    pub fn clear(&self) {
        self.routes.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.routes.len()
    }

    /// Total events discarded because a subscriber queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Receiving end of one subscription. Unregisters itself on drop.
///
/// Also usable as a [`Stream`] of events.
pub struct Subscription {
    id: u64,
    pattern: TopicPattern,
    rx: mpsc::Receiver<Event>,
    router: Weak<EventRouter>,
}

impl Subscription {
    /// Next event, or `None` once the router has let go of this route.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

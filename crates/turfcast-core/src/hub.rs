//! Subscriber broadcast hub.
//!
//! The hub owns the set of live subscriber channels and fans named
//! events out to all of them. Each subscriber gets its own unbounded
//! channel, so one slow or broken consumer never blocks delivery to
//! the rest: a failed send detaches exactly that subscriber.

use crate::event::{EventKind, PushEvent};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A unique subscriber identifier, assigned on attach.
pub type SubscriberId = u64;

/// One attached subscriber's sending half.
#[derive(Debug)]
struct SubscriberHandle {
    tx: mpsc::UnboundedSender<Arc<PushEvent>>,
}

/// The central broadcast hub.
///
/// Safe to share behind an `Arc`: attach, detach, and broadcast may
/// interleave freely from any task. A subscriber never observes a
/// broadcast before its own `hello` handshake, because the handshake
/// is queued on the subscriber's channel before the subscriber becomes
/// visible to `broadcast`.
#[derive(Debug, Default)]
pub struct Hub {
    /// Subscribers indexed by id.
    subscribers: DashMap<SubscriberId, SubscriberHandle>,
    /// Id source for attach.
    next_id: AtomicU64,
}

impl Hub {
    /// Create a new hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber.
    ///
    /// The `greeting` payload is delivered as a `hello` event before
    /// any subsequent broadcast reaches this subscriber. Returns the
    /// subscriber id and the receiving half of its channel; dropping
    /// the receiver (or calling [`Hub::detach`]) ends the subscription.
    pub fn attach(
        &self,
        greeting: Value,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<Arc<PushEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        // The receiver is alive here, so the handshake cannot fail.
        let _ = tx.send(Arc::new(PushEvent::new(EventKind::Hello, greeting)));

        self.subscribers.insert(id, SubscriberHandle { tx });
        debug!(subscriber = id, total = self.subscribers.len(), "Subscriber attached");

        (id, rx)
    }

    /// Detach a subscriber.
    ///
    /// Idempotent; returns `true` if the subscriber was still attached.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id, total = self.subscribers.len(), "Subscriber detached");
        }
        removed
    }

    /// Broadcast an event to every attached subscriber.
    ///
    /// Returns the number of subscribers the event was delivered to.
    /// Subscribers whose channel is closed are detached; delivery to
    /// the others is unaffected.
    pub fn broadcast(&self, event: PushEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().tx.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }

        // Removing while iterating would contend on the shard locks.
        for id in dead {
            self.detach(id);
        }

        trace!(event = %event.kind, recipients = delivered, "Broadcast");
        delivered
    }

    /// The number of currently attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if nobody is watching.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

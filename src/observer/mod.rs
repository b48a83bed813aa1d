use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::models::EventMessage;

/// Queue capacity per subscriber. A subscriber that falls this far behind is
/// dropped rather than allowed to stall publishers.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// A registered subscriber's receiving end
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<EventMessage>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EventMessage>,
}

/// Fan-out registry for push subscribers.
///
/// `broadcast` is best-effort: delivery goes through per-subscriber bounded
/// queues, and a subscriber whose queue is full or closed is removed on the
/// spot. Publishers never block.
pub struct ObserverHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber and hand back its event stream
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().expect("observer set poisoned");
        subscribers.push(Subscriber { id, tx });
        tracing::debug!(subscriber = id, total = subscribers.len(), "observer subscribed");

        Subscription { id, rx }
    }

    /// Remove a subscriber; its receiver sees the channel close
    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().expect("observer set poisoned");
        subscribers.retain(|s| s.id != id);
    }

    /// Deliver an event to every subscriber, dropping any whose queue is
    /// full or whose receiver is gone
    pub fn broadcast(&self, event: EventMessage) {
        let mut subscribers = self.subscribers.lock().expect("observer set poisoned");
        subscribers.retain(|s| match s.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(subscriber = s.id, error = %e, "dropping observer");
                false
            }
        });
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("observer set poisoned").len()
    }

    /// Drop every subscriber, closing their streams
    pub fn shutdown(&self) {
        let mut subscribers = self.subscribers.lock().expect("observer set poisoned");
        subscribers.clear();
    }
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Config, EventKind};

    fn config_event() -> EventMessage {
        EventMessage::config_updated(&Config::default())
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = ObserverHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.broadcast(config_event());

        assert_eq!(first.rx.recv().await.unwrap().kind, EventKind::ConfigUpdated);
        assert_eq!(second.rx.recv().await.unwrap().kind, EventKind::ConfigUpdated);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_on_overflow() {
        let hub = ObserverHub::new();
        let subscription = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        // Never drain; the first overflowing broadcast evicts the subscriber
        for _ in 0..=SUBSCRIBER_BUFFER {
            hub.broadcast(config_event());
        }
        assert_eq!(hub.subscriber_count(), 0);
        drop(subscription);
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_dropped() {
        let hub = ObserverHub::new();
        let subscription = hub.subscribe();
        drop(subscription.rx);

        hub.broadcast(config_event());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_stream() {
        let hub = ObserverHub::new();
        let mut subscription = hub.subscribe();

        hub.unsubscribe(subscription.id);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(subscription.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_cancels_all_subscribers() {
        let hub = ObserverHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.shutdown();

        assert!(first.rx.recv().await.is_none());
        assert!(second.rx.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use crate::protocol::BridgeEvent;

struct Subscriber {
    id: u64,
    tx: flume::Sender<BridgeEvent>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.subscribers().retain(|s| s.id != id);
    }
}

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`](EventBus::subscribe) creates a new
/// [`Subscription`] that receives every event published after it was
/// created. Dropping the subscription unsubscribes it. The bus is
/// thread-safe and cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// Subscribing to a closed bus yields a subscription that is already
    /// disconnected.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = flume::unbounded();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.is_closed() {
            self.inner.subscribers().push(Subscriber { id, tx });
        }
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Subscribers whose receivers are gone are pruned. Publishing to a
    /// closed bus is a no-op.
    pub fn publish(&self, event: BridgeEvent) {
        if self.is_closed() {
            debug!(event_type = event.event_type(), "dropping event on closed bus");
            return;
        }
        let mut subscribers = self.inner.subscribers();
        subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
    }

    /// Release all subscribers. Their receivers drain what was already
    /// queued and then report disconnection.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.subscribers().clear();
            debug!("event bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of an [`EventBus`] subscription, unsubscribed on drop.
pub struct Subscription {
    id: u64,
    rx: flume::Receiver<BridgeEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is closed and drained.
    pub async fn recv(&self) -> Option<BridgeEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    pub fn try_recv(&self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&self) -> Vec<BridgeEvent> {
        self.rx.try_iter().collect()
    }

    pub fn is_disconnected(&self) -> bool {
        self.rx.is_disconnected()
    }

    /// Explicitly end the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventKind;
    use tt_core::types::{TaskId, TaskStatus};

    fn phase_event(status: TaskStatus) -> BridgeEvent {
        BridgeEvent::for_task(TaskId::from("task_1_abcdefghi"), EventKind::phase(status))
    }

    #[tokio::test]
    async fn every_subscriber_receives_published_events() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(phase_event(TaskStatus::Planning));

        assert_eq!(a.recv().await.unwrap().event_type(), "agent.phase");
        assert_eq!(b.recv().await.unwrap().event_type(), "agent.phase");
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.publish(phase_event(TaskStatus::Planning));
        let sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(a);
        assert_eq!(bus.subscriber_count(), 1);
        b.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.publish(phase_event(TaskStatus::Planning));
        bus.publish(phase_event(TaskStatus::Acting));
        bus.publish(phase_event(TaskStatus::Finalizing));

        let phases: Vec<TaskStatus> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::AgentPhase(p) => Some(p.phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![TaskStatus::Planning, TaskStatus::Acting, TaskStatus::Finalizing]
        );
    }

    #[tokio::test]
    async fn close_drains_then_disconnects() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.publish(phase_event(TaskStatus::Planning));
        bus.close();
        bus.publish(phase_event(TaskStatus::Acting));

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert!(sub.is_disconnected());
        assert_eq!(bus.subscriber_count(), 0);

        let late = bus.subscribe();
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_timeout_returns_none_when_idle() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert!(sub.recv_timeout(Duration::from_millis(20)).await.is_none());
    }
}

use std::net::SocketAddr;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::connection::ConnId;

/// Lifecycle events published by a [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { peer: SocketAddr },
    Invalidated { reason: String },
    Disconnected { reason: String },
}

/// Lifecycle events published by a [`crate::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected { conn_id: ConnId, peer: SocketAddr },
    Invalidated { conn_id: ConnId, reason: String },
    Disconnected { conn_id: ConnId, reason: String },
}

/// Fan-out of events to any number of channel subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next publish.
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: E) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_each_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ClientEvent::Disconnected {
            reason: "bye".into(),
        });
        assert!(matches!(a.try_recv(), Ok(ClientEvent::Disconnected { .. })));
        assert!(matches!(b.try_recv(), Ok(ClientEvent::Disconnected { .. })));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(7);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(7));
    }
}

//! Fire-and-forget event broadcasting.
//!
//! [`EventBus`] carries transient events (transport errors, connection
//! notices, host shutdown requests) to whoever is subscribed at the moment of
//! sending. It is not a queue: subscribers that register after an event was
//! sent never see it. Every event type carries a `Clear` variant where it
//! makes sense, sent on each proxy shutdown so subscribers can discard any
//! locally cached transient state before a restart.

use crate::proxy::TransportKind;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Default per-bus buffer. Events are ephemeral; a subscriber lagging this
/// far behind skips ahead rather than stalling the sender.
const BUS_CAPACITY: usize = 64;

/// A broadcast channel for transient events.
///
/// Cheap to clone; all clones share the same channel. Sending with no active
/// subscribers silently drops the event.
#[derive(Debug, Clone)]
pub struct EventBus<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Deliver an event to all currently registered subscribers.
    pub fn send(&self, event: T) {
        // No subscribers means nobody to deliver to; that is fine.
        let _ = self.tx.send(event);
    }

    /// Register a subscriber. The subscription is active while the returned
    /// receiver is held.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport error notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ErrorEvent {
    /// Discard any cached error state (sent on every shutdown).
    Clear,
    /// A transport reported a failure.
    Transport {
        /// Which transport failed.
        kind: TransportKind,
        /// Failure description.
        message: String,
    },
}

/// Connection activity notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// Discard any cached connection state (sent on every shutdown).
    Clear,
    /// A peer connected (TCP accept) or was first seen (UDP).
    Opened {
        /// Transport the peer arrived on.
        kind: TransportKind,
        /// Peer address.
        peer: SocketAddr,
    },
    /// A peer's relay ended.
    Closed {
        /// Transport the peer was on.
        kind: TransportKind,
        /// Peer address.
        peer: SocketAddr,
    },
}

/// Host shutdown request, delivered to the lifecycle orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownEvent;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 49, 2)), 40000)
    }

    #[tokio::test]
    async fn test_delivers_to_active_subscriber() {
        let bus: EventBus<ErrorEvent> = EventBus::new();
        let mut rx = bus.subscribe();

        bus.send(ErrorEvent::Clear);
        assert_eq!(rx.recv().await.unwrap(), ErrorEvent::Clear);
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscribers() {
        let bus: EventBus<ConnectionEvent> = EventBus::new();
        bus.send(ConnectionEvent::Opened {
            kind: TransportKind::Tcp,
            peer: peer(),
        });

        let mut rx = bus.subscribe();
        bus.send(ConnectionEvent::Clear);

        // Only the event sent after subscription arrives.
        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Clear);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_without_subscribers_is_noop() {
        let bus: EventBus<ShutdownEvent> = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.send(ShutdownEvent);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus: EventBus<ErrorEvent> = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.send(ErrorEvent::Transport {
            kind: TransportKind::Udp,
            message: "recv failed".into(),
        });

        let ev_a = a.recv().await.unwrap();
        let ev_b = b.recv().await.unwrap();
        assert_eq!(ev_a, ev_b);
    }
}

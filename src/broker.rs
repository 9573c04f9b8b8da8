//! Notification broker: tracks the pending `/serialosc/notify` subscriber
//! list and fans out `/serialosc/add` / `/serialosc/remove` bursts to it.
//!
//! Subscribers are transactional, not persistent: registering during an
//! event-loop turn only guarantees delivery of notifications sent during
//! that same turn (or later, until the next drain). After any dispatch the
//! broker is marked dirty; the supervisor drains it once per turn.

use std::net::SocketAddr;

use mio::net::UdpSocket;

use rosc::{encoder, OscMessage, OscPacket, OscType};
use tracing::{trace, warn};

/// A `(host, port)` pair registered via `/serialosc/notify`.
pub type Subscriber = SocketAddr;

#[derive(Debug, Default)]
pub struct NotificationBroker {
    subscribers: Vec<Subscriber>,
    dirty: bool,
}

impl NotificationBroker {
    pub fn new() -> Self {
        NotificationBroker::default()
    }

    /// Append a notification subscriber. Appending is cheap and
    /// order-preserving; duplicates are allowed, matching the reference
    /// behavior of a plain append-only vector.
    pub fn subscribe(&mut self, addr: Subscriber) {
        self.subscribers.push(addr);
    }

    fn send_to_all(&mut self, socket: &UdpSocket, path: &str, serial: &str, friendly: &str, port: u16) {
        let packet = OscPacket::Message(OscMessage {
            addr: path.to_string(),
            args: vec![
                OscType::String(serial.to_string()),
                OscType::String(friendly.to_string()),
                OscType::Int(port as i32),
            ],
        });
        let bytes = match encoder::encode(&packet) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(?error, path, "failed to encode osc notification");
                return;
            }
        };
        for addr in &self.subscribers {
            if let Err(error) = socket.send_to(&bytes, addr) {
                warn!(?error, %addr, path, "failed to send osc notification");
            }
        }
        self.dirty = true;
    }

    /// Dispatch `/serialosc/add` to every pending subscriber. A no-op (aside
    /// from marking the broker dirty) when there are no subscribers.
    pub fn notify_add(&mut self, socket: &UdpSocket, serial: &str, friendly: &str, port: u16) {
        self.dirty = true;
        if self.subscribers.is_empty() {
            return;
        }
        self.send_to_all(socket, "/serialosc/add", serial, friendly, port);
    }

    /// Dispatch `/serialosc/remove` to every pending subscriber.
    pub fn notify_remove(&mut self, socket: &UdpSocket, serial: &str, friendly: &str, port: u16) {
        self.dirty = true;
        if self.subscribers.is_empty() {
            return;
        }
        self.send_to_all(socket, "/serialosc/remove", serial, friendly, port);
    }

    /// Called once at the end of every event-loop turn. Clears the
    /// subscriber list exactly when a notification was sent since the last
    /// drain, and is a no-op otherwise.
    pub fn drain_if_dirty(&mut self) {
        if self.dirty {
            trace!(subscribers = self.subscribers.len(), "draining notification subscribers");
            self.subscribers.clear();
            self.dirty = false;
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_clears_only_after_dirty() {
        let mut broker = NotificationBroker::new();
        broker.subscribe("127.0.0.1:9001".parse().unwrap());
        broker.drain_if_dirty();
        assert_eq!(broker.subscriber_count(), 1, "undirtied broker must not drain");
    }

    #[test]
    fn empty_subscriber_notify_still_marks_dirty() {
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut broker = NotificationBroker::new();
        broker.notify_add(&socket, "m1000001", "monome 64", 14000);
        assert!(broker.dirty, "empty-list dispatch must still raise the dirty flag");
    }

    #[test]
    fn subscribe_then_drain_on_dispatch() {
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut broker = NotificationBroker::new();
        broker.subscribe("127.0.0.1:9001".parse().unwrap());
        broker.notify_add(&socket, "m1000001", "monome 64", 14000);
        broker.drain_if_dirty();
        assert_eq!(broker.subscriber_count(), 0);
    }
}

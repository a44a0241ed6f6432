//! Subscriber registry, owned by the coordinator state.
//!
//! The coordinator holds the sending half of every subscriber channel and
//! delivers with `try_send` only: a subscriber that fell behind or whose
//! task died is dropped on the spot, never buffered unboundedly or awaited
//! on. Connection tasks hold the receiving half and deregister themselves
//! on every exit path.

use std::collections::BTreeMap;

use fila_core::PartyId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::messages::SubscriberMessage;

const LOG_TARGET: &str = "fila::subscribers";

/// Per-subscriber buffer; a connection this far behind is dead weight.
const SUBSCRIBER_BUFFER: usize = 64;

/// Opaque handle identifying one subscriber connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriberId(u64);

enum SubscriberKind {
    Host,
    Guest(PartyId),
}

struct Subscriber {
    kind: SubscriberKind,
    tx: mpsc::Sender<SubscriberMessage>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: u64,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn subscribe_host(&mut self) -> (SubscriberId, mpsc::Receiver<SubscriberMessage>) {
        self.subscribe(SubscriberKind::Host)
    }

    pub fn subscribe_guest(
        &mut self,
        party: PartyId,
    ) -> (SubscriberId, mpsc::Receiver<SubscriberMessage>) {
        self.subscribe(SubscriberKind::Guest(party))
    }

    fn subscribe(
        &mut self,
        kind: SubscriberKind,
    ) -> (SubscriberId, mpsc::Receiver<SubscriberMessage>) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.insert(id, Subscriber { kind, tx });
        (id, rx)
    }

    pub fn remove(&mut self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver to one subscriber; drops it on backpressure or disconnect.
    pub fn send_to(&mut self, id: SubscriberId, msg: SubscriberMessage) {
        let Some(subscriber) = self.subscribers.get(&id) else {
            return;
        };
        if subscriber.tx.try_send(msg).is_err() {
            debug!(target: LOG_TARGET, ?id, "Dropping unresponsive subscriber");
            self.subscribers.remove(&id);
        }
    }

    pub fn send_hosts(&mut self, msg: &SubscriberMessage) {
        self.retain_delivering(|kind| matches!(kind, SubscriberKind::Host), msg);
    }

    pub fn send_guest(&mut self, party: PartyId, msg: &SubscriberMessage) {
        self.retain_delivering(
            |kind| matches!(kind, SubscriberKind::Guest(p) if *p == party),
            msg,
        );
    }

    pub fn send_all(&mut self, msg: &SubscriberMessage) {
        self.retain_delivering(|_| true, msg);
    }

    fn retain_delivering(
        &mut self,
        matches: impl Fn(&SubscriberKind) -> bool,
        msg: &SubscriberMessage,
    ) {
        self.subscribers.retain(|id, subscriber| {
            if !matches(&subscriber.kind) {
                return true;
            }
            let delivered = subscriber.tx.try_send(msg.clone()).is_ok();
            if !delivered {
                debug!(target: LOG_TARGET, ?id, "Dropping unresponsive subscriber");
            }
            delivered
        });
    }

    /// Drop all subscribers of a party, ending their connections.
    ///
    /// Called after the terminal message has been delivered; the closed
    /// channel is what makes the connection task send its close frame.
    pub fn disconnect_guest(&mut self, party: PartyId) {
        self.subscribers
            .retain(|_, s| !matches!(s.kind, SubscriberKind::Guest(p) if p == party));
    }

    pub fn disconnect_all(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_delivery_is_scoped() {
        let mut registry = SubscriberRegistry::default();
        let party_a = PartyId::generate();
        let party_b = PartyId::generate();

        let (_host_id, mut host_rx) = registry.subscribe_host();
        let (_a_id, mut a_rx) = registry.subscribe_guest(party_a);
        let (_b_id, mut b_rx) = registry.subscribe_guest(party_b);

        registry.send_guest(party_a, &SubscriberMessage::Ping);
        assert_eq!(a_rx.try_recv().ok(), Some(SubscriberMessage::Ping));
        assert!(b_rx.try_recv().is_err());
        assert!(host_rx.try_recv().is_err());

        registry.send_hosts(&SubscriberMessage::Closed);
        assert_eq!(host_rx.try_recv().ok(), Some(SubscriberMessage::Closed));
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn full_subscriber_is_dropped() {
        let mut registry = SubscriberRegistry::default();
        let party = PartyId::generate();
        let (_id, _rx) = registry.subscribe_guest(party);

        for _ in 0..(SUBSCRIBER_BUFFER + 1) {
            registry.send_guest(party, &SubscriberMessage::Ping);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_guest_closes_channel() {
        let mut registry = SubscriberRegistry::default();
        let party = PartyId::generate();
        let (_id, mut rx) = registry.subscribe_guest(party);

        registry.send_guest(
            party,
            &SubscriberMessage::Removed {
                reason: "kicked".to_string(),
            },
        );
        registry.disconnect_guest(party);

        assert!(matches!(
            rx.try_recv(),
            Ok(SubscriberMessage::Removed { .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}

//! Peer handles and the outbound message seam.
//!
//! Protocol code never touches sockets. It talks to an [`Outbox`], which
//! allows the pool and election logic to be tested without real
//! networking. The daemon uses [`QueuedOutbox`] and drains it after each
//! locked step.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::messages::TypedMessage;

/// Opaque identifier of a connected peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

/// What the handlers know about the sender of a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Protocol version announced in the peer handshake.
    pub version: u32,
}

/// Outbound side of the peer network.
pub trait Outbox {
    /// Send to an already connected peer.
    fn send(&mut self, peer: PeerId, msg: TypedMessage);

    /// Send to an address, connecting if needed. Returns false if the
    /// address cannot be reached.
    fn send_to_addr(&mut self, addr: SocketAddr, msg: TypedMessage) -> bool;

    /// Send to every connected peer.
    fn broadcast(&mut self, msg: TypedMessage);

    /// Add to a peer's misbehaviour score.
    fn misbehaving(&mut self, peer: PeerId, score: u32);
}

/// A buffered outbound intent.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    ToPeer(PeerId, TypedMessage),
    ToAddr(SocketAddr, TypedMessage),
    Broadcast(TypedMessage),
    Misbehaving(PeerId, u32),
}

/// [`Outbox`] that records intents for later delivery.
#[derive(Debug, Default)]
pub struct QueuedOutbox {
    pending: Vec<Outbound>,
    /// Addresses `send_to_addr` reports as unreachable.
    unreachable: Vec<SocketAddr>,
}

impl QueuedOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an address as unreachable for subsequent `send_to_addr` calls.
    pub fn set_unreachable(&mut self, addr: SocketAddr) {
        if !self.unreachable.contains(&addr) {
            self.unreachable.push(addr);
        }
    }

    /// Take all pending intents.
    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Outbound] {
        &self.pending
    }

    /// Messages (of any routing) whose command matches `command`.
    pub fn messages_named(&self, command: &str) -> Vec<&TypedMessage> {
        self.pending
            .iter()
            .filter_map(|o| match o {
                Outbound::ToPeer(_, m) | Outbound::ToAddr(_, m) | Outbound::Broadcast(m) => {
                    Some(m)
                }
                Outbound::Misbehaving(..) => None,
            })
            .filter(|m| m.command() == command)
            .collect()
    }

    /// Total misbehaviour score recorded for `peer`.
    pub fn penalty_for(&self, peer: PeerId) -> u32 {
        self.pending
            .iter()
            .filter_map(|o| match o {
                Outbound::Misbehaving(p, s) if *p == peer => Some(*s),
                _ => None,
            })
            .sum()
    }
}

impl Outbox for QueuedOutbox {
    fn send(&mut self, peer: PeerId, msg: TypedMessage) {
        tracing::trace!(peer = peer.0, command = msg.command(), "queue send");
        self.pending.push(Outbound::ToPeer(peer, msg));
    }

    fn send_to_addr(&mut self, addr: SocketAddr, msg: TypedMessage) -> bool {
        if self.unreachable.contains(&addr) {
            tracing::debug!(%addr, command = msg.command(), "address unreachable");
            return false;
        }
        self.pending.push(Outbound::ToAddr(addr, msg));
        true
    }

    fn broadcast(&mut self, msg: TypedMessage) {
        tracing::trace!(command = msg.command(), "queue broadcast");
        self.pending.push(Outbound::Broadcast(msg));
    }

    fn misbehaving(&mut self, peer: PeerId, score: u32) {
        tracing::warn!(peer = peer.0, score, "peer misbehaving");
        self.pending.push(Outbound::Misbehaving(peer, score));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MnGet;

    #[test]
    fn test_queued_outbox_records() {
        let mut outbox = QueuedOutbox::new();
        outbox.send(PeerId(1), TypedMessage::MnGet(MnGet {}));
        outbox.broadcast(TypedMessage::MnGet(MnGet {}));
        outbox.misbehaving(PeerId(1), 30);
        outbox.misbehaving(PeerId(1), 100);

        assert_eq!(outbox.messages_named("mnget").len(), 2);
        assert_eq!(outbox.penalty_for(PeerId(1)), 130);
        assert_eq!(outbox.penalty_for(PeerId(2)), 0);
        assert_eq!(outbox.drain().len(), 4);
        assert!(outbox.pending().is_empty());
    }

    #[test]
    fn test_unreachable_address() {
        let mut outbox = QueuedOutbox::new();
        let addr: SocketAddr = "10.0.0.1:9999".parse().expect("addr");
        outbox.set_unreachable(addr);
        assert!(!outbox.send_to_addr(addr, TypedMessage::MnGet(MnGet {})));
        let other: SocketAddr = "10.0.0.2:9999".parse().expect("addr");
        assert!(outbox.send_to_addr(other, TypedMessage::MnGet(MnGet {})));
        assert_eq!(outbox.pending().len(), 1);
    }
}

//! Queue announcements.
//!
//! A relay signs each announcement twice with its node key: once over the
//! announcement itself and once over the block height, which later serves
//! as the freshness proof for relay envelopes.

use darkmix_crypto::ed25519::SigningKey;
use darkmix_crypto::signer::{sign_message, verify_message};
use darkmix_types::{QueueAnnouncement, RelayNode, TxIn};

use crate::ENTRY_TTL_SECS;

/// Message signed as the freshness proof for `height`.
pub fn height_message(height: u64) -> String {
    height.to_string()
}

/// Sign `dsq` and its freshness proof at `height`.
pub fn sign_queue(dsq: &mut QueueAnnouncement, key: &SigningKey, height: u64) {
    dsq.sig = Some(sign_message(key, &dsq.signing_message()));
    dsq.block_height = height;
    dsq.relay_sig = Some(sign_message(key, &height_message(height)));
}

/// Verify `dsq` against the node key of the relay that sent it. Ready
/// announcements must also carry a valid freshness proof.
pub fn check_signature(dsq: &QueueAnnouncement, relay: &RelayNode) -> bool {
    let Some(sig) = &dsq.sig else {
        return false;
    };
    if verify_message(&relay.node_key, sig, &dsq.signing_message()).is_err() {
        tracing::warn!(relay = %relay.vin, "bad queue signature");
        return false;
    }
    if dsq.ready {
        let Some(relay_sig) = &dsq.relay_sig else {
            return false;
        };
        if verify_message(&relay.node_key, relay_sig, &height_message(dsq.block_height)).is_err()
        {
            tracing::warn!(relay = %relay.vin, "bad queue freshness signature");
            return false;
        }
    }
    true
}

pub fn is_expired(dsq: &QueueAnnouncement, now_secs: i64) -> bool {
    now_secs - dsq.time > ENTRY_TTL_SECS
}

/// Announcements heard from the network.
#[derive(Clone, Debug, Default)]
pub struct QueueBook {
    items: Vec<QueueAnnouncement>,
}

impl QueueBook {
    /// Whether any held announcement, live or not, comes from `vin`.
    pub fn contains_vin(&self, vin: &TxIn) -> bool {
        self.items.iter().any(|q| q.vin.prevout == vin.prevout)
    }

    pub fn push(&mut self, dsq: QueueAnnouncement) {
        self.items.push(dsq);
    }

    /// Drop at most one expired announcement.
    pub fn remove_expired_one(&mut self, now_secs: i64) -> Option<QueueAnnouncement> {
        let idx = self.items.iter().position(|q| is_expired(q, now_secs))?;
        Some(self.items.remove(idx))
    }

    pub fn remove_vin(&mut self, vin: &TxIn) {
        self.items.retain(|q| q.vin.prevout != vin.prevout);
    }

    /// Unexpired announcements, oldest first.
    pub fn live(&self, now_secs: i64) -> Vec<QueueAnnouncement> {
        self.items
            .iter()
            .filter(|q| !is_expired(q, now_secs))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::relay_node;
    use darkmix_types::OutPoint;

    fn announcement(seed: u8, time: i64, ready: bool) -> QueueAnnouncement {
        QueueAnnouncement {
            vin: TxIn::new(OutPoint::new([seed; 32], 0)),
            denom: 4,
            time,
            ready,
            sig: None,
            relay_sig: None,
            block_height: 0,
            shared_key: None,
        }
    }

    #[test]
    fn test_sign_and_check() {
        let (node, key) = relay_node(1);
        let mut dsq = announcement(1, 100, false);
        assert!(!check_signature(&dsq, &node));
        sign_queue(&mut dsq, &key, 55);
        assert_eq!(dsq.block_height, 55);
        assert!(check_signature(&dsq, &node));

        dsq.denom = 8;
        assert!(!check_signature(&dsq, &node));
    }

    #[test]
    fn test_ready_requires_fresh_proof() {
        let (node, key) = relay_node(1);
        let mut dsq = announcement(1, 100, true);
        sign_queue(&mut dsq, &key, 55);
        assert!(check_signature(&dsq, &node));

        dsq.block_height = 56;
        assert!(!check_signature(&dsq, &node));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (node, _) = relay_node(1);
        let (_, other_key) = relay_node(2);
        let mut dsq = announcement(1, 100, false);
        sign_queue(&mut dsq, &other_key, 1);
        assert!(!check_signature(&dsq, &node));
    }

    #[test]
    fn test_book_expiry() {
        let mut book = QueueBook::default();
        book.push(announcement(1, 100, false));
        book.push(announcement(2, 120, false));
        assert!(book.contains_vin(&TxIn::new(OutPoint::new([1; 32], 0))));
        assert_eq!(book.live(131).len(), 1);

        let removed = book.remove_expired_one(131).expect("expired");
        assert_eq!(removed.time, 100);
        assert!(book.remove_expired_one(131).is_none());
        assert_eq!(book.len(), 1);

        book.remove_vin(&TxIn::new(OutPoint::new([2; 32], 0)));
        assert!(book.is_empty());
    }
}

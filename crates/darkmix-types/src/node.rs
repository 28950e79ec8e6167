//! Relay node (masternode) descriptors as seen through the directory.

use std::net::SocketAddr;

use darkmix_crypto::ed25519::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::tx::{Script, TxIn};

/// Liveness state of a relay node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayNodeState {
    Enabled,
    Expired,
    VinSpent,
    Removed,
}

/// A relay node known to the directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayNode {
    /// Bonded collateral input; identifies the node.
    pub vin: TxIn,
    /// Network address.
    pub addr: SocketAddr,
    /// Key owning the collateral output.
    pub collateral_key: VerifyingKey,
    /// Node identity key used for queue and freshness signatures.
    pub node_key: VerifyingKey,
    /// Time the node announcement was signed (unix seconds).
    pub sig_time: i64,
    /// Last time the node was heard from (unix seconds).
    pub last_seen: i64,
    /// Advertised protocol version.
    pub protocol_version: u32,
    /// Value of the directory's queue counter when this node last queued.
    pub last_dsq: i64,
    /// Confirmations of the collateral input.
    pub input_age: u32,
    pub state: RelayNodeState,
}

impl RelayNode {
    pub fn is_enabled(&self) -> bool {
        self.state == RelayNodeState::Enabled
    }

    /// Payment script of the collateral key owner.
    pub fn payee(&self) -> Script {
        let digest = darkmix_crypto::blake3::hash(self.collateral_key.as_bytes());
        let mut key_hash = [0u8; 20];
        key_hash.copy_from_slice(&digest[..20]);
        Script::p2pkh(&key_hash)
    }

    /// Anti-domination rule: a node that queued recently may not queue
    /// again until `count_above_protocol / 5` other queues have been seen.
    pub fn queued_too_recently(&self, dsq_count: i64, count_above_protocol: usize) -> bool {
        self.last_dsq != 0 && self.last_dsq + (count_above_protocol / 5) as i64 > dsq_count
    }
}

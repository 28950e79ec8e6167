//! Records exchanged by the mixing and election protocols.

use std::fmt;

use darkmix_crypto::ed25519::Signature;
use darkmix_crypto::signer::SharedKey;
use serde::{Deserialize, Serialize};

use crate::tx::{Script, Transaction, TxIn, TxOut};
use crate::{Result, TypesError};

/// Mixing session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolState {
    Idle,
    Queue,
    AcceptingEntries,
    FinalizeTransaction,
    Signing,
    Transmission,
    Error,
    Success,
}

impl PoolState {
    /// Wire code.
    pub fn code(self) -> i32 {
        match self {
            Self::Idle => 1,
            Self::Queue => 2,
            Self::AcceptingEntries => 3,
            Self::FinalizeTransaction => 4,
            Self::Signing => 5,
            Self::Transmission => 6,
            Self::Error => 7,
            Self::Success => 8,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            1 => Self::Idle,
            2 => Self::Queue,
            3 => Self::AcceptingEntries,
            4 => Self::FinalizeTransaction,
            5 => Self::Signing,
            6 => Self::Transmission,
            7 => Self::Error,
            8 => Self::Success,
            other => return Err(TypesError::UnknownState(other)),
        })
    }

    /// Error and Success hold until the reset cooldown.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Success)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Queue => "QUEUE",
            Self::AcceptingEntries => "ACCEPTING_ENTRIES",
            Self::FinalizeTransaction => "FINALIZE_TRANSACTION",
            Self::Signing => "SIGNING",
            Self::Transmission => "TRANSMISSION",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

/// Outcome code carried by a status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Rejected,
    Accepted,
    /// Informational broadcast after a state change.
    Reset,
}

impl EntryStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Rejected => 0,
            Self::Accepted => 1,
            Self::Reset => -1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Rejected),
            1 => Ok(Self::Accepted),
            -1 => Ok(Self::Reset),
            other => Err(TypesError::UnknownStatus(other)),
        }
    }
}

/// A relay advertising an open (or ready) mixing round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueAnnouncement {
    /// Announcing relay's collateral input.
    pub vin: TxIn,
    /// Denomination bitmask of the round.
    pub denom: u32,
    /// Creation time (unix seconds).
    pub time: i64,
    /// The round is full and accepting entries.
    pub ready: bool,
    /// Node-key signature over the announcement.
    pub sig: Option<Signature>,
    /// Freshness signature over `block_height`.
    pub relay_sig: Option<Signature>,
    pub block_height: u64,
    /// Per-round key, present on ready announcements.
    pub shared_key: Option<SharedKey>,
}

impl QueueAnnouncement {
    /// Text covered by `sig`.
    pub fn signing_message(&self) -> String {
        format!("{}{}{}{}", self.vin, self.denom, self.time, self.ready)
    }
}

/// Kind of item carried by a relay envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayKind {
    In,
    Out,
    Sig,
}

/// Payload of a relay envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayItem {
    /// An unsigned input to add to the joint transaction.
    In(TxIn),
    /// An output to add.
    Out(TxOut),
    /// A signed input.
    Sig(TxIn),
}

impl RelayItem {
    pub fn kind(&self) -> RelayKind {
        match self {
            Self::In(_) => RelayKind::In,
            Self::Out(_) => RelayKind::Out,
            Self::Sig(_) => RelayKind::Sig,
        }
    }

    /// Bytes covered by the shared-key MAC.
    pub fn mac_material(&self) -> Vec<u8> {
        match self {
            Self::In(input) => format!("in:{input}:{}", input.script_sig).into_bytes(),
            Self::Out(output) => format!("out:{output}").into_bytes(),
            Self::Sig(input) => format!("sig:{input}:{}", input.script_sig).into_bytes(),
        }
    }
}

/// An item travelling from a submitter through a forwarding relay to the
/// session relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Session relay the item is destined for.
    pub target: TxIn,
    /// Session relay's freshness signature over `block_height`.
    pub relay_sig: Signature,
    pub block_height: u64,
    pub item: RelayItem,
    /// Shared-key MAC over the item.
    pub shared_sig: [u8; 32],
}

/// The relay elected to be paid at a given height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentWinner {
    pub block_height: u64,
    /// Winning relay's collateral input.
    pub vin: TxIn,
    /// Script paid by the block.
    pub payee: Script,
    pub score: u64,
    /// Election authority signature.
    pub sig: Option<Signature>,
}

impl PaymentWinner {
    /// Text covered by `sig`.
    pub fn signing_message(&self) -> String {
        format!("{}{}{}", self.vin, self.block_height, self.payee)
    }
}

/// Signed record of a joint transaction broadcast by a session relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastTx {
    pub tx: Transaction,
    /// Relay that produced the transaction.
    pub vin: TxIn,
    /// Node-key signature over `txid || sig_time`.
    pub sig: Signature,
    pub sig_time: i64,
}

impl BroadcastTx {
    pub fn signing_message(txid: &[u8; 32], sig_time: i64) -> String {
        format!("{}{}", hex::encode(txid), sig_time)
    }
}

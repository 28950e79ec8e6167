//! Message payloads for the mixing and election protocols.
//!
//! Each wire command has a payload struct here (or reuses a record from
//! `darkmix-types`). Payloads are serialized to CBOR for inclusion in
//! [`ProtocolMessage`](crate::wire::ProtocolMessage) envelopes.

use darkmix_types::{
    Amount, PaymentWinner, QueueAnnouncement, RelayEnvelope, Transaction, TxIn, TxOut,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message type constants
// ---------------------------------------------------------------------------

/// Message type for session open/join requests (0x0101).
pub const MSG_DSA: u16 = 0x0101;
/// Message type for session status updates (0x0102).
pub const MSG_DSSU: u16 = 0x0102;
/// Message type for queue announcements (0x0103).
pub const MSG_DSQ: u16 = 0x0103;
/// Message type for direct entry submission (0x0104).
pub const MSG_DSI: u16 = 0x0104;
/// Message type for relay forwarding requests (0x0105).
pub const MSG_DSR: u16 = 0x0105;
/// Message type for forwarded anonymous items (0x0106).
pub const MSG_DSAI: u16 = 0x0106;
/// Message type for partial signatures (0x0107).
pub const MSG_DSS: u16 = 0x0107;
/// Message type for the finalized transaction (0x0108).
pub const MSG_DSF: u16 = 0x0108;
/// Message type for round completion (0x0109).
pub const MSG_DSC: u16 = 0x0109;

/// Message type for payment winner sync requests (0x0201).
pub const MSG_MNGET: u16 = 0x0201;
/// Message type for payment winner announcements (0x0202).
pub const MSG_MNW: u16 = 0x0202;

// ---------------------------------------------------------------------------
// Mixing payloads
// ---------------------------------------------------------------------------

/// `dsa`: ask a relay to open or join a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DsAccept {
    /// Denomination bitmask the submitter wants to mix.
    pub denom: u32,
    /// Signed collateral transaction, charged on misbehaviour.
    pub collateral: Transaction,
}

/// `dssu`: relay status update or response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsStatus {
    pub session_id: u32,
    /// Pool state code.
    pub state: i32,
    /// Number of entries the relay holds.
    pub entries: u32,
    /// Entry status code: 1 accepted, 0 rejected, -1 reset.
    pub accepted: i32,
    /// Reason text for rejections.
    pub error: String,
}

/// `dsi`: an entry sent directly to the session relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DsEntry {
    pub inputs: Vec<TxIn>,
    /// Declared input value.
    pub amount: Amount,
    pub collateral: Transaction,
    pub outputs: Vec<TxOut>,
}

/// `dss`: signed inputs for the final transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DsSignatures {
    pub inputs: Vec<TxIn>,
}

/// `dsf`: the joint transaction ready for signing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DsFinal {
    pub session_id: u32,
    pub tx: Transaction,
}

/// `dsc`: the round finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsComplete {
    pub session_id: u32,
    /// True when the round failed.
    pub error: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Election payloads
// ---------------------------------------------------------------------------

/// `mnget`: request recent payment winners.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MnGet {}

// ---------------------------------------------------------------------------
// Typed message enum
// ---------------------------------------------------------------------------

/// A typed protocol message, covering every wire command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypedMessage {
    /// Session request (0x0101).
    Dsa(DsAccept),
    /// Status update (0x0102).
    Dssu(DsStatus),
    /// Queue announcement (0x0103).
    Dsq(QueueAnnouncement),
    /// Direct entry (0x0104).
    Dsi(DsEntry),
    /// Forwarding request (0x0105).
    Dsr(RelayEnvelope),
    /// Forwarded anonymous item (0x0106).
    Dsai(RelayEnvelope),
    /// Signatures (0x0107).
    Dss(DsSignatures),
    /// Final transaction (0x0108).
    Dsf(DsFinal),
    /// Completion (0x0109).
    Dsc(DsComplete),
    /// Winner sync request (0x0201).
    MnGet(MnGet),
    /// Winner announcement (0x0202).
    Mnw(PaymentWinner),
}

impl TypedMessage {
    /// Message type code of this variant.
    pub fn msg_type(&self) -> u16 {
        match self {
            Self::Dsa(_) => MSG_DSA,
            Self::Dssu(_) => MSG_DSSU,
            Self::Dsq(_) => MSG_DSQ,
            Self::Dsi(_) => MSG_DSI,
            Self::Dsr(_) => MSG_DSR,
            Self::Dsai(_) => MSG_DSAI,
            Self::Dss(_) => MSG_DSS,
            Self::Dsf(_) => MSG_DSF,
            Self::Dsc(_) => MSG_DSC,
            Self::MnGet(_) => MSG_MNGET,
            Self::Mnw(_) => MSG_MNW,
        }
    }

    /// Short command name used in logs.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Dsa(_) => "dsa",
            Self::Dssu(_) => "dssu",
            Self::Dsq(_) => "dsq",
            Self::Dsi(_) => "dsi",
            Self::Dsr(_) => "dsr",
            Self::Dsai(_) => "dsai",
            Self::Dss(_) => "dss",
            Self::Dsf(_) => "dsf",
            Self::Dsc(_) => "dsc",
            Self::MnGet(_) => "mnget",
            Self::Mnw(_) => "mnw",
        }
    }

    /// True for messages handled by the payment election.
    pub fn is_election(&self) -> bool {
        matches!(self, Self::MnGet(_) | Self::Mnw(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_types::{OutPoint, Script};

    #[test]
    fn test_msg_types_are_distinct() {
        let all = [
            MSG_DSA, MSG_DSSU, MSG_DSQ, MSG_DSI, MSG_DSR, MSG_DSAI, MSG_DSS, MSG_DSF, MSG_DSC,
            MSG_MNGET, MSG_MNW,
        ];
        let unique: std::collections::HashSet<u16> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_typed_message_msg_type() {
        let dsc = TypedMessage::Dsc(DsComplete {
            session_id: 1,
            error: false,
            message: "ok".to_string(),
        });
        assert_eq!(dsc.msg_type(), MSG_DSC);
        assert_eq!(dsc.command(), "dsc");
        assert!(!dsc.is_election());

        let get = TypedMessage::MnGet(MnGet {});
        assert_eq!(get.msg_type(), MSG_MNGET);
        assert!(get.is_election());
    }

    #[test]
    fn test_entry_serialize() {
        let entry = DsEntry {
            inputs: vec![TxIn::new(OutPoint::new([3u8; 32], 1))],
            amount: 100_000_001,
            collateral: Transaction::default(),
            outputs: vec![TxOut::new(100_000_001, Script::p2pkh(&[1u8; 20]))],
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        let restored: DsEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, entry);
    }
}

//! UTXO transaction model.
//!
//! Only the parts the mixing protocol inspects are modelled: outpoints,
//! scripts as opaque bytes with a standard pay-to-key-hash check, and a
//! canonical byte encoding from which transaction ids are derived.

use std::fmt;

use darkmix_crypto::blake3::{self, contexts};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Monetary amount in the smallest unit.
pub type Amount = i64;

/// 32-byte hash.
pub type Hash = [u8; 32];

/// One coin in base units.
pub const COIN: Amount = 100_000_000;

/// One hundredth of a coin.
pub const CENT: Amount = 1_000_000;

/// Reference to a previous transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Funding transaction id.
    pub hash: Hash,
    /// Output index.
    pub n: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, n: u32) -> Self {
        Self { hash, n }
    }

    /// The null outpoint (all-zero hash, index `u32::MAX`).
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            n: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.n == u32::MAX
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", hex::encode(self.hash), self.n)
    }
}

/// Opaque script bytes.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(#[serde_as(as = "serde_with::hex::Hex")] pub Vec<u8>);

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_PUSH20: u8 = 0x14;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

impl Script {
    /// Standard pay-to-key-hash script for a 20-byte key hash.
    pub fn p2pkh(key_hash: &[u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(25);
        bytes.extend_from_slice(&[OP_DUP, OP_HASH160, OP_PUSH20]);
        bytes.extend_from_slice(key_hash);
        bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(bytes)
    }

    /// True for the 25-byte standard pay-to-key-hash form.
    pub fn is_normal_payment_script(&self) -> bool {
        self.0.len() == 25
            && self.0[..3] == [OP_DUP, OP_HASH160, OP_PUSH20]
            && self.0[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Transaction input.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Script of the spent output, carried alongside so a signature can be
    /// checked without a chain lookup.
    pub prev_pub_key: Script,
}

impl TxIn {
    /// Unsigned input spending `prevout` with a final sequence number.
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::default(),
            sequence: u32::MAX,
            prev_pub_key: Script::default(),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty()
    }
}

impl fmt::Display for TxIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxIn({}, seq={})", self.prevout, self.sequence)
    }
}

/// Transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl fmt::Display for TxOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxOut({}, {})", self.value, self.script_pubkey)
    }
}

/// A transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            vin,
            vout,
            lock_time: 0,
        }
    }

    /// Canonical byte encoding. `prev_pub_key` is local metadata and is not
    /// part of it.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.vin.len() as u32).to_le_bytes());
        for input in &self.vin {
            out.extend_from_slice(&input.prevout.hash);
            out.extend_from_slice(&input.prevout.n.to_le_bytes());
            out.extend_from_slice(&(input.script_sig.0.len() as u32).to_le_bytes());
            out.extend_from_slice(&input.script_sig.0);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        out.extend_from_slice(&(self.vout.len() as u32).to_le_bytes());
        for output in &self.vout {
            out.extend_from_slice(&output.value.to_le_bytes());
            out.extend_from_slice(&(output.script_pubkey.0.len() as u32).to_le_bytes());
            out.extend_from_slice(&output.script_pubkey.0);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Transaction id.
    pub fn txid(&self) -> Hash {
        blake3::derive_key(contexts::TRANSACTION_ID, &self.encode())
    }

    /// Sum of output values.
    pub fn value_out(&self) -> Amount {
        self.vout.iter().map(|o| o.value).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vin.is_empty() && self.vout.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_outpoint() {
        assert!(OutPoint::null().is_null());
        assert!(OutPoint::default().is_null());
        assert!(!OutPoint::new([0u8; 32], 0).is_null());
    }

    #[test]
    fn test_outpoint_display() {
        let op = OutPoint::new([0xAB; 32], 3);
        assert!(op.to_string().ends_with("-3"));
        assert!(op.to_string().starts_with("abab"));
    }

    #[test]
    fn test_p2pkh_is_normal() {
        let script = Script::p2pkh(&[7u8; 20]);
        assert_eq!(script.as_bytes().len(), 25);
        assert!(script.is_normal_payment_script());

        let mut bad = script.clone();
        bad.0[24] = 0x00;
        assert!(!bad.is_normal_payment_script());
        assert!(!Script(vec![0x6a, 0x01, 0x00]).is_normal_payment_script());
    }

    #[test]
    fn test_txid_changes_with_signature() {
        let mut tx = Transaction::new(
            vec![TxIn::new(OutPoint::new([1u8; 32], 0))],
            vec![TxOut::new(COIN, Script::p2pkh(&[2u8; 20]))],
        );
        let unsigned = tx.txid();
        tx.vin[0].script_sig = Script(vec![1, 2, 3]);
        assert_ne!(unsigned, tx.txid());
        assert!(tx.vin[0].is_signed());
    }

    #[test]
    fn test_prev_pub_key_not_encoded() {
        let mut tx = Transaction::new(vec![TxIn::new(OutPoint::new([1u8; 32], 0))], vec![]);
        let before = tx.encode();
        tx.vin[0].prev_pub_key = Script::p2pkh(&[9u8; 20]);
        assert_eq!(before, tx.encode());
    }

    #[test]
    fn test_value_out() {
        let tx = Transaction::new(
            vec![],
            vec![
                TxOut::new(COIN, Script::default()),
                TxOut::new(CENT, Script::default()),
            ],
        );
        assert_eq!(tx.value_out(), COIN + CENT);
    }

    #[test]
    fn test_script_serializes_as_hex() {
        let script = Script(vec![0xde, 0xad]);
        let json = serde_json::to_string(&script).expect("serialize");
        assert_eq!(json, "\"dead\"");
        let restored: Script = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, script);
    }
}

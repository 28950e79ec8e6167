//! Deterministic claim scores.
//!
//! Digests are compared as 256-bit little-endian integers. The score is the
//! low 64 bits of the distance between the digest of an old block hash and
//! the digest of the candidate's collateral transaction hash.

use std::cmp::Ordering;

use darkmix_crypto::blake3::{self, contexts};
use darkmix_types::{Hash, PaymentWinner, TxIn};

/// Blocks between the scored height and the block hash seeding its score.
pub const SCORE_BLOCK_OFFSET: u64 = 576;

fn cmp_le(a: &Hash, b: &Hash) -> Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

/// `|a - b|` over 256-bit little-endian integers.
pub fn abs_diff(a: &Hash, b: &Hash) -> Hash {
    let (hi, lo) = match cmp_le(a, b) {
        Ordering::Less => (b, a),
        _ => (a, b),
    };
    let mut out = [0u8; 32];
    let mut borrow = 0u8;
    for i in 0..32 {
        let (d1, o1) = hi[i].overflowing_sub(lo[i]);
        let (d2, o2) = d1.overflowing_sub(borrow);
        out[i] = d2;
        borrow = u8::from(o1 || o2);
    }
    out
}

/// Low 64 bits of a 256-bit little-endian integer.
pub fn low64(value: &Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&value[..8]);
    u64::from_le_bytes(bytes)
}

/// Score of `vin` against the block hash seeding the election.
pub fn calculate_score(block_hash: &Hash, vin: &TxIn) -> u64 {
    let d1 = blake3::hash(block_hash);
    let d2 = blake3::hash(&vin.prevout.hash);
    low64(&abs_diff(&d1, &d2))
}

/// Key of a winner announcement in the seen-votes map.
pub fn vote_hash(winner: &PaymentWinner) -> Hash {
    let height = blake3::derive_key(contexts::BLOCK_HEIGHT, &winner.block_height.to_le_bytes());
    abs_diff(&winner.vin.prevout.hash, &height)
}

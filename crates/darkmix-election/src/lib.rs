//! # darkmix-election
//!
//! Payment election: one relay node is paid per block height.
//!
//! Every node can compute the score of a claim from chain data alone, so
//! claims gossiped by `mnw` are checked locally and the larger score for a
//! height always wins. Only a node holding the election authority key
//! produces winners.
//!
//! ## Modules
//!
//! - [`score`] — Deterministic claim scores and vote hashes
//! - [`winners`] — Per-height winner records
//! - [`election`] — Winner production, gossip handling and sync

pub mod election;
pub mod score;
pub mod winners;

pub use election::{ElectionContext, PaymentElection};

/// Misbehaviour score for a bad winner sequence or signature.
pub const PENALTY_BAD_WINNER: u32 = 100;

/// Error types for election operations.
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// The winner input does not carry a final sequence number.
    #[error("invalid winner sequence: {0}")]
    InvalidSequence(u32),

    /// The authority signature on a winner did not verify.
    #[error("invalid winner signature at height {0}")]
    InvalidSignature(u64),

    /// No authority signing key is loaded.
    #[error("election signing key not set")]
    NoSigningKey,

    /// The configured key does not match the authority key.
    #[error("signing key does not match the election authority")]
    KeyMismatch,

    /// The block the score depends on is not known.
    #[error("no block hash for height {0}")]
    UnknownBlock(u64),
}

impl ElectionError {
    /// Misbehaviour score owed by the sender, if any.
    pub fn penalty(&self) -> Option<u32> {
        match self {
            Self::InvalidSequence(_) | Self::InvalidSignature(_) => Some(PENALTY_BAD_WINNER),
            _ => None,
        }
    }
}

/// Convenience result type for election operations.
pub type Result<T> = std::result::Result<T, ElectionError>;

//! # darkmix-types
//!
//! Shared domain types used across the darkmix workspace: the UTXO
//! transaction model, relay node descriptors and the records exchanged by
//! the mixing and payment election protocols.

pub mod mixing;
pub mod node;
pub mod tx;

pub use mixing::{
    BroadcastTx, EntryStatus, PaymentWinner, PoolState, QueueAnnouncement, RelayEnvelope,
    RelayItem, RelayKind,
};
pub use node::{RelayNode, RelayNodeState};
pub use tx::{Amount, Hash, OutPoint, Script, Transaction, TxIn, TxOut, CENT, COIN};

/// Errors raised while interpreting wire-level domain values.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// Unknown pool state code.
    #[error("unknown pool state code {0}")]
    UnknownState(i32),

    /// Unknown entry status code.
    #[error("unknown entry status code {0}")]
    UnknownStatus(i32),
}

pub type Result<T> = std::result::Result<T, TypesError>;

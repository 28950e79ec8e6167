//! # darkmix-pool
//!
//! The mixing session: relay-side round coordination and the submitter
//! side that feeds it.
//!
//! One [`MixingPool`] value holds the whole state of a node, whichever
//! [`Role`] it plays. Every mutation goes through a method taking a
//! [`MixContext`], which carries the clock, the collaborators and the RNG
//! for that step. Nothing in this crate blocks or owns a socket.
//!
//! ## Modules
//!
//! - [`state`] — Transition table and the state-change hook
//! - [`entry`] — Admitted entries and their per-item bookkeeping
//! - [`anon`] — Accumulator for anonymously relayed items
//! - [`queue`] — Queue announcements: signing, checking, expiry
//! - [`collateral`] — Collateral validity rules
//! - [`session`] — The pool itself: admission, tick, timeouts, commit
//! - [`fees`] — Collateral charging
//! - [`relay`] — Envelope creation, forwarding and acceptance
//! - [`client`] — Submitter side: status, trickle, downgrade, signing
//! - [`driver`] — Automatic denomination and relay selection
//! - [`rounds`] — Mixing depth of wallet inputs
//! - [`handler`] — Wire message dispatch

pub mod anon;
pub mod client;
pub mod collateral;
pub mod driver;
pub mod entry;
pub mod fees;
pub mod handler;
pub mod queue;
pub mod relay;
pub mod rounds;
pub mod session;
pub mod state;

pub use session::MixingPool;

use darkmix_crypto::ed25519::SigningKey;
use darkmix_ports::{ChainView, PortsError, RelayDirectory, Wallet};
use darkmix_transport::peer::Outbox;
use darkmix_types::TxIn;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Lowest peer protocol allowed to take part in mixing.
pub const MIN_POOL_PEER_PROTO_VERSION: u32 = 70054;

/// Default participants per round.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 3;

/// Queue and entry acceptance window.
pub const QUEUE_TIMEOUT_MS: i64 = 30_000;

/// Signature collection window.
pub const SIGNING_TIMEOUT_MS: i64 = 30_000;

/// Time in AcceptingEntries after which a submitter falls back to `dsi`.
pub const DOWNGRADE_TIMEOUT_MS: i64 = 70_000;

/// Extra slack submitters give the relay on every timeout.
pub const CLIENT_LAG_MS: i64 = 5_000;

/// How long Error and Success are held before resetting.
pub const TERMINAL_COOLDOWN_MS: i64 = 10_000;

/// Minimum time in AcceptingEntries before finalizing from anon items.
pub const ANON_FINALIZE_DELAY_MS: i64 = 5_000;

/// Lifetime of an admitted entry and of a queue announcement.
pub const ENTRY_TTL_SECS: i64 = 30;

/// Blocks a relay freshness signature stays valid for.
pub const MAX_RELAY_SIG_AGE: u64 = 10;

/// Worst rank a relay may have and still forward envelopes.
pub const MAX_FORWARDER_RANK: usize = 20;

/// Trickle rounds before a submitter downgrades.
pub const DOWNGRADE_AFTER_TRICKLES: u32 = 20;

/// Own signatures sent per signing round.
pub const MAX_SIGS_PER_ROUND: usize = 8;

/// Misbehaviour score for a bad relay or winner signature.
pub const PENALTY_BAD_RELAY_SIG: u32 = 100;

/// Misbehaviour score for a bad shared-key signature.
pub const PENALTY_BAD_SHARED_SIG: u32 = 30;

/// Mixing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub enabled: bool,
    pub max_participants: usize,
    pub min_protocol: u32,
    /// Rounds a coin should go through.
    pub rounds: i32,
    /// Target anonymized balance in whole coins.
    pub anonymize_amount: i64,
    /// 0 disables the liquidity-provider behaviour.
    pub liquidity_provider: u32,
    /// Blocks to wait after a successful round or denomination.
    pub min_block_spacing: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            min_protocol: MIN_POOL_PEER_PROTO_VERSION,
            rounds: 2,
            anonymize_amount: 1000,
            liquidity_provider: 0,
            min_block_spacing: 1,
        }
    }
}

/// Relay identity: the collateral input and the node key.
#[derive(Clone, Debug)]
pub struct RelayIdentity {
    pub vin: TxIn,
    /// `None` when the configured key failed to parse.
    pub node_key: Option<SigningKey>,
}

/// Which side of the protocol this node plays.
#[derive(Clone, Debug)]
pub enum Role {
    Client,
    Relay(RelayIdentity),
}

impl Role {
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::Relay(_))
    }
}

/// Clock, collaborators and randomness for one locked step.
pub struct MixContext<'a> {
    /// Wall clock in milliseconds.
    pub now_ms: i64,
    pub chain: &'a mut dyn ChainView,
    pub directory: &'a mut dyn RelayDirectory,
    pub wallet: &'a mut dyn Wallet,
    pub outbox: &'a mut dyn Outbox,
    pub rng: &'a mut dyn RngCore,
}

impl MixContext<'_> {
    pub fn now_secs(&self) -> i64 {
        self.now_ms / 1000
    }

    /// Uniform draw in `0..n`. `n` must be non-zero.
    pub(crate) fn rand_below(&mut self, n: u32) -> u32 {
        self.rng.next_u32() % n.max(1)
    }
}

/// Error types for pool operations.
///
/// The `Display` text of a variant is the reason sent to the peer in
/// `dssu` or `dsc`.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Incompatible version.")]
    IncompatibleVersion,

    #[error("This is not a relay node.")]
    NotRelay,

    #[error("Not in the relay list.")]
    NotInDirectory,

    #[error("Last mixing round was too recent.")]
    TooRecent,

    #[error("Collateral not valid.")]
    CollateralInvalid,

    #[error("Incompatible mode.")]
    IncompatibleMode,

    #[error("Relay queue is full.")]
    QueueFull,

    #[error("No matching denominations found for mixing.")]
    DenominationMismatch,

    #[error("Session not complete!")]
    SessionNotComplete,

    #[error("Not compatible with existing transactions.")]
    IncompatibleEntries,

    #[error("Non-standard public key detected.")]
    NonStandardScript,

    #[error("Invalid script detected.")]
    InvalidScript,

    #[error("Value more than the pool maximum allows.")]
    ValueTooHigh,

    #[error("Transaction fees are too high.")]
    FeesTooHigh,

    #[error("Missing input transaction information.")]
    MissingInputs,

    #[error("Transaction not valid.")]
    TransactionInvalid,

    #[error("Input is not valid.")]
    InvalidInput,

    #[error("Entries are full.")]
    EntriesFull,

    #[error("Already have that input.")]
    DuplicateInput,

    /// A freshness signature is older than [`MAX_RELAY_SIG_AGE`] blocks.
    #[error("relay signature too old: height {height}, best {best}")]
    StaleSignature {
        /// Height the signature covers.
        height: u64,
        /// Current best height.
        best: u64,
    },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown relay node")]
    UnknownRelay,

    /// This relay ranks too low to forward envelopes.
    #[error("relay rank {rank} too low to forward")]
    RankTooLow {
        /// Our rank, if any.
        rank: usize,
    },

    #[error("no shared key for the current round")]
    NoSharedKey,

    #[error("relay key unavailable")]
    RelayKeyUnavailable,

    #[error("not submitted to this relay")]
    WrongRelay,

    #[error("session id mismatch")]
    SessionMismatch,

    #[error("state does not allow this message: {0}")]
    WrongState(darkmix_types::PoolState),

    /// A cryptographic proof failed.
    #[error("{reason}")]
    Misbehavior {
        /// Log text.
        reason: String,
        /// Score to add to the sender.
        penalty: u32,
    },

    #[error(transparent)]
    Wallet(#[from] PortsError),
}

impl PoolError {
    /// Misbehaviour score owed by the sender, if any.
    pub fn penalty(&self) -> Option<u32> {
        match self {
            Self::Misbehavior { penalty, .. } => Some(*penalty),
            _ => None,
        }
    }

    /// Expected rejections during normal contention for a relay.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::TooRecent
                | Self::IncompatibleMode
                | Self::QueueFull
                | Self::DenominationMismatch
                | Self::EntriesFull
                | Self::DuplicateInput
        )
    }

    pub(crate) fn misbehavior(reason: impl Into<String>, penalty: u32) -> Self {
        Self::Misbehavior {
            reason: reason.into(),
            penalty,
        }
    }
}

/// Convenience result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_only_for_misbehavior() {
        assert_eq!(PoolError::misbehavior("bad sig", 100).penalty(), Some(100));
        assert_eq!(PoolError::QueueFull.penalty(), None);
    }

    #[test]
    fn test_contention_classification() {
        assert!(PoolError::QueueFull.is_contention());
        assert!(PoolError::DuplicateInput.is_contention());
        assert!(!PoolError::CollateralInvalid.is_contention());
        assert!(!PoolError::misbehavior("x", 30).is_contention());
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(PoolError::EntriesFull.to_string(), "Entries are full.");
        assert_eq!(
            PoolError::FeesTooHigh.to_string(),
            "Transaction fees are too high."
        );
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_participants, 3);
        assert_eq!(config.min_protocol, MIN_POOL_PEER_PROTO_VERSION);
    }
}

//! # darkmix-ports
//!
//! Narrow interfaces to the collaborators the mixing protocol does not own:
//! the relay-node directory, the chain/mempool view and the wallet.
//!
//! ## Modules
//!
//! - [`memory`] — In-memory implementations for the daemon and tests

pub mod memory;

use darkmix_types::{Amount, Hash, OutPoint, RelayNode, Script, Transaction, TxIn, TxOut};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Error types for collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum PortsError {
    /// The wallet could not fund a payment.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Amount the payment needs.
        needed: Amount,
        /// Spendable amount of the requested coin class.
        available: Amount,
    },

    /// The wallet has no coins that fit the request.
    #[error("no compatible inputs: {0}")]
    NoCompatibleInputs(String),

    /// The wallet is locked.
    #[error("wallet is locked")]
    WalletLocked,
}

/// Convenience result type for collaborator calls.
pub type Result<T> = std::result::Result<T, PortsError>;

/// A wallet coin picked by coin selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCoin {
    pub input: TxIn,
    pub value: Amount,
}

/// Which coins a payment to self may spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinSource {
    /// Non-denominated coins that are not relay collateral.
    NonDenominated,
    /// Denominated coins only.
    Denominated,
}

/// An entry the wallet assembled for the current session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedEntry {
    pub inputs: Vec<TxIn>,
    /// Sum of the input values.
    pub amount: Amount,
    pub outputs: Vec<TxOut>,
}

/// Lookup, ranking and liveness of relay nodes.
pub trait RelayDirectory {
    fn find(&self, vin: &OutPoint) -> Option<RelayNode>;

    /// 1-based rank of `vin` at `height` among relays speaking at least
    /// `min_protocol`.
    fn rank(&self, vin: &OutPoint, height: u64, min_protocol: u32) -> Option<usize>;

    fn by_rank(&self, rank: usize, height: u64, min_protocol: u32) -> Option<RelayNode>;

    fn random(&self, rng: &mut dyn RngCore) -> Option<RelayNode>;

    /// Enabled relay with the oldest signature time whose vin is not in
    /// `exclude`.
    fn oldest_not_in(&self, exclude: &[OutPoint]) -> Option<RelayNode>;

    fn count_enabled(&self) -> usize;

    fn count_above_protocol(&self, min_protocol: u32) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-ready queue announcements accepted so far.
    fn dsq_count(&self) -> i64;

    /// Bump the announcement counter and stamp it on the relay. Returns the
    /// new count, or `None` if the relay is unknown.
    fn mark_dsq(&mut self, vin: &OutPoint) -> Option<i64>;
}

/// Read access to the chain plus mempool submission.
pub trait ChainView {
    fn best_height(&self) -> u64;

    fn block_hash(&self, height: u64) -> Option<Hash>;

    /// Value of an unspent output, if the chain or mempool knows it.
    fn output_value(&self, outpoint: &OutPoint) -> Option<Amount>;

    /// Whether the mempool would accept the inputs of `tx`.
    fn acceptable_inputs(&self, tx: &Transaction) -> bool;

    /// Accept into the mempool and relay. Returns false on rejection.
    fn submit_transaction(&mut self, tx: &Transaction) -> bool;

    /// Verify the signature script of input `index` against `tx`.
    fn verify_input_signature(&self, tx: &Transaction, index: usize) -> bool;

    fn is_initial_block_download(&self) -> bool;
}

/// The local wallet.
pub trait Wallet {
    fn is_locked(&self) -> bool;

    fn balance(&self) -> Amount;

    fn anonymized_balance(&self) -> Amount;

    /// Unconfirmed value sitting in denominated outputs.
    fn unconfirmed_denominated_balance(&self) -> Amount;

    fn has_collateral_inputs(&self) -> bool;

    /// Every spendable denominated coin.
    fn denominated_coins(&self) -> Vec<SelectedCoin>;

    /// Coins with mixing rounds in `min_rounds..=max_rounds`, accumulated
    /// up to `max_value`. `None` if the selection is below `min_value`.
    fn select_coins_dark(
        &self,
        min_value: Amount,
        max_value: Amount,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Option<Vec<SelectedCoin>>;

    /// Like [`Wallet::select_coins_dark`], restricted to the
    /// denominations set in `denom`.
    fn select_coins_by_denominations(
        &self,
        denom: u32,
        min_value: Amount,
        max_value: Amount,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Option<Vec<SelectedCoin>>;

    /// Signed transaction spending a collateral coin, for `dsa`/`dsi`.
    fn create_collateral_transaction(&mut self) -> Result<Transaction>;

    /// Assemble this session's entry from coins matching `denom`.
    fn prepare_denominate(
        &mut self,
        denom: u32,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Result<PreparedEntry>;

    /// Pay `amounts` to fresh addresses of our own, funded from `source`.
    fn commit_outputs(&mut self, amounts: &[Amount], source: CoinSource) -> Result<Hash>;

    /// Signature script for input `index` of `tx`, if the key is ours.
    fn sign_input(&self, tx: &Transaction, index: usize) -> Option<Script>;

    fn transaction(&self, hash: &Hash) -> Option<Transaction>;

    fn is_mine(&self, input: &TxIn) -> bool;

    fn lock_coin(&mut self, outpoint: &OutPoint);

    fn unlock_coin(&mut self, outpoint: &OutPoint);
}

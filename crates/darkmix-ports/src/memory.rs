//! In-memory collaborators.
//!
//! These back the daemon until it is wired to a real node, and drive every
//! protocol test. Signatures are deterministic tags derived from the spent
//! outpoint, so a test can tell a signed input from an unsigned one without
//! a script interpreter.

use std::collections::{HashMap, HashSet};

use darkmix_crypto::blake3::{self, contexts};
use darkmix_denom::{
    codec::{is_collateral_amount, is_denominated_amount},
    DARKSEND_COLLATERAL, DARKSEND_FEE, DENOMINATIONS, POOL_MAX,
};
use darkmix_types::{Amount, Hash, OutPoint, RelayNode, Script, Transaction, TxIn, TxOut};
use rand::RngCore;

use crate::{
    ChainView, CoinSource, PortsError, PreparedEntry, RelayDirectory, Result, SelectedCoin, Wallet,
};

/// The signature script the in-memory wallet produces for `prevout`, and
/// the only one [`MemoryChain`] accepts for it.
pub fn signature_for(prevout: &OutPoint) -> Script {
    let digest = blake3::encode_multi_field(&[b"sig", &prevout.hash, &prevout.n.to_le_bytes()]);
    Script(blake3::hash(&digest).to_vec())
}

fn encode_outpoint(outpoint: &OutPoint) -> Vec<u8> {
    let mut bytes = outpoint.hash.to_vec();
    bytes.extend_from_slice(&outpoint.n.to_le_bytes());
    bytes
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Relay directory held in a vector.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    nodes: Vec<RelayNode>,
    dsq_count: i64,
}

impl MemoryDirectory {
    pub fn new(nodes: Vec<RelayNode>) -> Self {
        Self {
            nodes,
            dsq_count: 0,
        }
    }

    /// Insert or replace the node with the same vin.
    pub fn insert(&mut self, node: RelayNode) {
        match self
            .nodes
            .iter_mut()
            .find(|n| n.vin.prevout == node.vin.prevout)
        {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    pub fn get_mut(&mut self, vin: &OutPoint) -> Option<&mut RelayNode> {
        self.nodes.iter_mut().find(|n| n.vin.prevout == *vin)
    }

    pub fn nodes(&self) -> &[RelayNode] {
        &self.nodes
    }

    /// Rank score of a relay at a height. Higher ranks first.
    fn score(node: &RelayNode, height: u64) -> Hash {
        let mut material = encode_outpoint(&node.vin.prevout);
        material.extend_from_slice(&height.to_le_bytes());
        blake3::hash(&material)
    }

    fn ranked(&self, height: u64, min_protocol: u32) -> Vec<&RelayNode> {
        let mut ranked: Vec<&RelayNode> = self
            .nodes
            .iter()
            .filter(|n| n.is_enabled() && n.protocol_version >= min_protocol)
            .collect();
        ranked.sort_by(|a, b| Self::score(b, height).cmp(&Self::score(a, height)));
        ranked
    }
}

impl RelayDirectory for MemoryDirectory {
    fn find(&self, vin: &OutPoint) -> Option<RelayNode> {
        self.nodes.iter().find(|n| n.vin.prevout == *vin).cloned()
    }

    fn rank(&self, vin: &OutPoint, height: u64, min_protocol: u32) -> Option<usize> {
        self.ranked(height, min_protocol)
            .iter()
            .position(|n| n.vin.prevout == *vin)
            .map(|i| i + 1)
    }

    fn by_rank(&self, rank: usize, height: u64, min_protocol: u32) -> Option<RelayNode> {
        if rank == 0 {
            return None;
        }
        self.ranked(height, min_protocol)
            .get(rank - 1)
            .map(|n| (*n).clone())
    }

    fn random(&self, rng: &mut dyn RngCore) -> Option<RelayNode> {
        let enabled: Vec<&RelayNode> = self.nodes.iter().filter(|n| n.is_enabled()).collect();
        if enabled.is_empty() {
            return None;
        }
        let idx = rng.next_u32() as usize % enabled.len();
        Some(enabled[idx].clone())
    }

    fn oldest_not_in(&self, exclude: &[OutPoint]) -> Option<RelayNode> {
        self.nodes
            .iter()
            .filter(|n| n.is_enabled() && !exclude.contains(&n.vin.prevout))
            .min_by_key(|n| n.sig_time)
            .cloned()
    }

    fn count_enabled(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_enabled()).count()
    }

    fn count_above_protocol(&self, min_protocol: u32) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_enabled() && n.protocol_version >= min_protocol)
            .count()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn dsq_count(&self) -> i64 {
        self.dsq_count
    }

    fn mark_dsq(&mut self, vin: &OutPoint) -> Option<i64> {
        let count = self.dsq_count + 1;
        let node = self.nodes.iter_mut().find(|n| n.vin.prevout == *vin)?;
        node.last_dsq = count;
        self.dsq_count = count;
        Some(count)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Chain tip, UTXO set and mempool in one map.
#[derive(Debug, Default)]
pub struct MemoryChain {
    height: u64,
    outputs: HashMap<OutPoint, Amount>,
    /// Outpoints whose spends the mempool refuses.
    refused: HashSet<OutPoint>,
    reject_all: bool,
    initial_download: bool,
    submitted: Vec<Transaction>,
}

impl MemoryChain {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    pub fn add_output(&mut self, outpoint: OutPoint, value: Amount) {
        self.outputs.insert(outpoint, value);
    }

    /// Register every output of `tx` as unspent.
    pub fn add_transaction(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        for (n, out) in tx.vout.iter().enumerate() {
            self.outputs.insert(OutPoint::new(txid, n as u32), out.value);
        }
    }

    /// Make the mempool refuse any transaction spending `outpoint`.
    pub fn refuse_spend(&mut self, outpoint: OutPoint) {
        self.refused.insert(outpoint);
    }

    /// Make [`ChainView::submit_transaction`] reject everything.
    pub fn set_reject_all(&mut self, reject: bool) {
        self.reject_all = reject;
    }

    pub fn set_initial_download(&mut self, downloading: bool) {
        self.initial_download = downloading;
    }

    /// Transactions accepted so far, oldest first.
    pub fn submitted(&self) -> &[Transaction] {
        &self.submitted
    }
}

impl ChainView for MemoryChain {
    fn best_height(&self) -> u64 {
        self.height
    }

    fn block_hash(&self, height: u64) -> Option<Hash> {
        if height > self.height {
            return None;
        }
        Some(blake3::derive_key(
            contexts::BLOCK_HEIGHT,
            &height.to_le_bytes(),
        ))
    }

    fn output_value(&self, outpoint: &OutPoint) -> Option<Amount> {
        self.outputs.get(outpoint).copied()
    }

    fn acceptable_inputs(&self, tx: &Transaction) -> bool {
        !tx.vin.is_empty()
            && tx.vin.iter().all(|input| {
                self.outputs.contains_key(&input.prevout) && !self.refused.contains(&input.prevout)
            })
    }

    fn submit_transaction(&mut self, tx: &Transaction) -> bool {
        if self.reject_all || !self.acceptable_inputs(tx) {
            return false;
        }
        if !(0..tx.vin.len()).all(|i| self.verify_input_signature(tx, i)) {
            tracing::debug!("mempool: unsigned or badly signed input");
            return false;
        }
        for input in &tx.vin {
            self.outputs.remove(&input.prevout);
        }
        self.add_transaction(tx);
        self.submitted.push(tx.clone());
        true
    }

    fn verify_input_signature(&self, tx: &Transaction, index: usize) -> bool {
        tx.vin
            .get(index)
            .is_some_and(|input| input.script_sig == signature_for(&input.prevout))
    }

    fn is_initial_block_download(&self) -> bool {
        self.initial_download
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A spendable output held by [`MemoryWallet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub value: Amount,
    /// Mixing rounds; -2 for non-denominated values.
    pub rounds: i32,
    pub confirmed: bool,
}

/// Wallet with a flat coin list.
#[derive(Debug)]
pub struct MemoryWallet {
    coins: Vec<WalletCoin>,
    owned: HashSet<OutPoint>,
    locked: HashSet<OutPoint>,
    transactions: HashMap<Hash, Transaction>,
    seed: [u8; 32],
    next_address: u32,
    wallet_locked: bool,
    anonymized_rounds: i32,
}

impl MemoryWallet {
    /// `seed` keeps the outpoints and addresses of separate wallets apart.
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            coins: Vec::new(),
            owned: HashSet::new(),
            locked: HashSet::new(),
            transactions: HashMap::new(),
            seed,
            next_address: 0,
            wallet_locked: false,
            anonymized_rounds: 2,
        }
    }

    /// Rounds a coin needs before it counts as anonymized.
    pub fn set_anonymized_rounds(&mut self, rounds: i32) {
        self.anonymized_rounds = rounds;
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.wallet_locked = locked;
    }

    /// Mark a coin as (un)confirmed. Unconfirmed coins are not spendable.
    pub fn set_confirmed(&mut self, outpoint: &OutPoint, confirmed: bool) {
        if let Some(coin) = self.coins.iter_mut().find(|c| c.outpoint == *outpoint) {
            coin.confirmed = confirmed;
        }
    }

    fn fresh_script(&mut self) -> Script {
        self.next_address += 1;
        let digest = blake3::hash(&blake3::encode_multi_field(&[
            &self.seed,
            &self.next_address.to_le_bytes(),
        ]));
        let mut key_hash = [0u8; 20];
        key_hash.copy_from_slice(&digest[..20]);
        Script::p2pkh(&key_hash)
    }

    /// Record a funding transaction and take its outputs as coins.
    /// Denominated outputs start at `rounds`.
    pub fn add_transaction(&mut self, tx: Transaction, rounds: i32) -> Hash {
        let txid = tx.txid();
        for (n, out) in tx.vout.iter().enumerate() {
            let outpoint = OutPoint::new(txid, n as u32);
            self.coins.push(WalletCoin {
                outpoint,
                value: out.value,
                rounds: if is_denominated_amount(out.value) {
                    rounds
                } else {
                    -2
                },
                confirmed: true,
            });
            self.owned.insert(outpoint);
        }
        self.transactions.insert(txid, tx);
        txid
    }

    /// Fund the wallet with single-output transactions of `values`.
    pub fn fund(&mut self, values: &[Amount], rounds: i32) -> Vec<OutPoint> {
        values
            .iter()
            .map(|&value| {
                let script = self.fresh_script();
                let mut source = TxIn::new(OutPoint::new(self.seed, self.next_address));
                source.script_sig = Script(b"coinbase".to_vec());
                let txid = self.add_transaction(
                    Transaction::new(vec![source], vec![TxOut::new(value, script)]),
                    rounds,
                );
                OutPoint::new(txid, 0)
            })
            .collect()
    }

    pub fn coins(&self) -> &[WalletCoin] {
        &self.coins
    }

    pub fn is_coin_locked(&self, outpoint: &OutPoint) -> bool {
        self.locked.contains(outpoint)
    }

    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    fn spendable(&self) -> impl Iterator<Item = &WalletCoin> {
        self.coins
            .iter()
            .filter(|c| c.confirmed && !self.locked.contains(&c.outpoint))
    }

    fn select(
        &self,
        accept: impl Fn(&WalletCoin) -> bool,
        min_value: Amount,
        max_value: Amount,
    ) -> Option<Vec<SelectedCoin>> {
        let mut total = 0;
        let mut selected = Vec::new();
        for coin in self.spendable().filter(|c| accept(c)) {
            if total + coin.value > max_value {
                continue;
            }
            total += coin.value;
            selected.push(SelectedCoin {
                input: TxIn::new(coin.outpoint),
                value: coin.value,
            });
        }
        (!selected.is_empty() && total >= min_value).then_some(selected)
    }

    fn signed_input(&self, outpoint: OutPoint) -> TxIn {
        let mut input = TxIn::new(outpoint);
        input.script_sig = signature_for(&outpoint);
        input
    }
}

fn denom_allows(denom: u32, value: Amount) -> bool {
    DENOMINATIONS
        .iter()
        .enumerate()
        .any(|(i, d)| denom & (1 << i) != 0 && *d == value)
}

impl Wallet for MemoryWallet {
    fn is_locked(&self) -> bool {
        self.wallet_locked
    }

    fn balance(&self) -> Amount {
        self.coins.iter().map(|c| c.value).sum()
    }

    fn anonymized_balance(&self) -> Amount {
        self.coins
            .iter()
            .filter(|c| is_denominated_amount(c.value) && c.rounds >= self.anonymized_rounds)
            .map(|c| c.value)
            .sum()
    }

    fn unconfirmed_denominated_balance(&self) -> Amount {
        self.coins
            .iter()
            .filter(|c| !c.confirmed && is_denominated_amount(c.value))
            .map(|c| c.value)
            .sum()
    }

    fn has_collateral_inputs(&self) -> bool {
        self.spendable().any(|c| is_collateral_amount(c.value))
    }

    fn denominated_coins(&self) -> Vec<SelectedCoin> {
        self.spendable()
            .filter(|c| is_denominated_amount(c.value))
            .map(|c| SelectedCoin {
                input: TxIn::new(c.outpoint),
                value: c.value,
            })
            .collect()
    }

    fn select_coins_dark(
        &self,
        min_value: Amount,
        max_value: Amount,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Option<Vec<SelectedCoin>> {
        self.select(
            |c| {
                !is_collateral_amount(c.value) && c.rounds >= min_rounds && c.rounds <= max_rounds
            },
            min_value,
            max_value,
        )
    }

    fn select_coins_by_denominations(
        &self,
        denom: u32,
        min_value: Amount,
        max_value: Amount,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Option<Vec<SelectedCoin>> {
        self.select(
            |c| denom_allows(denom, c.value) && c.rounds >= min_rounds && c.rounds <= max_rounds,
            min_value,
            max_value,
        )
    }

    fn create_collateral_transaction(&mut self) -> Result<Transaction> {
        if self.wallet_locked {
            return Err(PortsError::WalletLocked);
        }
        let coin = self
            .spendable()
            .find(|c| is_collateral_amount(c.value))
            .cloned()
            .ok_or_else(|| PortsError::NoCompatibleInputs("no collateral-sized coin".into()))?;
        let change = self.fresh_script();
        Ok(Transaction::new(
            vec![self.signed_input(coin.outpoint)],
            vec![TxOut::new(coin.value - DARKSEND_COLLATERAL, change)],
        ))
    }

    fn prepare_denominate(
        &mut self,
        denom: u32,
        min_rounds: i32,
        max_rounds: i32,
    ) -> Result<PreparedEntry> {
        if self.wallet_locked {
            return Err(PortsError::WalletLocked);
        }
        let selected = self
            .select_coins_by_denominations(denom, 0, POOL_MAX, min_rounds, max_rounds)
            .ok_or_else(|| {
                PortsError::NoCompatibleInputs(format!("no coins for denomination {denom}"))
            })?;
        let mut inputs = Vec::with_capacity(selected.len());
        let mut outputs = Vec::with_capacity(selected.len());
        let mut amount = 0;
        for coin in selected {
            let script = self.fresh_script();
            let mut input = coin.input;
            input.prev_pub_key = script.clone();
            inputs.push(input);
            outputs.push(TxOut::new(coin.value, script));
            amount += coin.value;
        }
        Ok(PreparedEntry {
            inputs,
            amount,
            outputs,
        })
    }

    fn commit_outputs(&mut self, amounts: &[Amount], source: CoinSource) -> Result<Hash> {
        if self.wallet_locked {
            return Err(PortsError::WalletLocked);
        }
        let needed: Amount = amounts.iter().sum::<Amount>() + DARKSEND_FEE;
        let eligible: Vec<WalletCoin> = self
            .spendable()
            .filter(|c| match source {
                CoinSource::NonDenominated => {
                    !is_denominated_amount(c.value) && !is_collateral_amount(c.value)
                }
                CoinSource::Denominated => is_denominated_amount(c.value),
            })
            .cloned()
            .collect();

        let mut total = 0;
        let mut spent = Vec::new();
        for coin in eligible {
            if total >= needed {
                break;
            }
            total += coin.value;
            spent.push(coin.outpoint);
        }
        if total < needed {
            return Err(PortsError::InsufficientFunds {
                needed,
                available: total,
            });
        }

        let mut vout = Vec::with_capacity(amounts.len() + 1);
        for &value in amounts {
            let script = self.fresh_script();
            vout.push(TxOut::new(value, script));
        }
        let change = total - needed;
        if change > 0 {
            let script = self.fresh_script();
            vout.push(TxOut::new(change, script));
        }
        let vin = spent.iter().map(|op| self.signed_input(*op)).collect();
        self.coins.retain(|c| !spent.contains(&c.outpoint));
        let txid = self.add_transaction(Transaction::new(vin, vout), 0);
        tracing::debug!(outputs = amounts.len(), change, "wallet committed payment to self");
        Ok(txid)
    }

    fn sign_input(&self, tx: &Transaction, index: usize) -> Option<Script> {
        let input = tx.vin.get(index)?;
        self.is_mine(input).then(|| signature_for(&input.prevout))
    }

    fn transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.transactions.get(hash).cloned()
    }

    fn is_mine(&self, input: &TxIn) -> bool {
        self.owned.contains(&input.prevout)
    }

    fn lock_coin(&mut self, outpoint: &OutPoint) {
        self.locked.insert(*outpoint);
    }

    fn unlock_coin(&mut self, outpoint: &OutPoint) {
        self.locked.remove(outpoint);
    }
}

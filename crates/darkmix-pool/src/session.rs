//! The mixing pool.
//!
//! A relay holds at most one round at a time. The round opens with the
//! first compatible `dsa`, fills its queue, accepts entries, composes the
//! joint transaction, collects signatures and commits. [`MixingPool::check`]
//! advances the round on every tick, and [`MixingPool::check_timeout`]
//! resets rounds that stall.
//!
//! Submitters use the same value to track their side of a round.

use std::collections::HashMap;

use darkmix_crypto::ed25519::Signature;
use darkmix_crypto::signer::{sign_message, SharedKey};
use darkmix_ports::ChainView;
use darkmix_transport::messages::{DsComplete, DsFinal, TypedMessage};
use darkmix_types::{
    Amount, BroadcastTx, EntryStatus, Hash, OutPoint, PoolState, QueueAnnouncement, RelayNode,
    Transaction, TxIn, TxOut,
};
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::anon::AnonAccumulator;
use crate::collateral::is_collateral_valid;
use crate::entry::Entry;
use crate::queue::{self, QueueBook};
use crate::rounds::RoundsMemo;
use crate::{
    MixContext, PoolConfig, PoolError, RelayIdentity, Result, Role, ANON_FINALIZE_DELAY_MS,
    CLIENT_LAG_MS, DOWNGRADE_TIMEOUT_MS, QUEUE_TIMEOUT_MS, SIGNING_TIMEOUT_MS,
    TERMINAL_COOLDOWN_MS,
};

/// A finished round, as seen by this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub session_id: u32,
    pub error: bool,
    pub message: String,
}

/// Mixing state of one node.
#[derive(Debug)]
pub struct MixingPool {
    pub(crate) config: PoolConfig,
    pub(crate) role: Role,

    pub(crate) state: PoolState,
    pub(crate) last_state_change_ms: i64,
    pub(crate) session_id: u32,
    pub(crate) session_denom: u32,
    pub(crate) session_users: usize,
    pub(crate) session_found: bool,
    pub(crate) session_collaterals: Vec<Transaction>,

    /// Relay side: admitted entries.
    pub(crate) entries: Vec<Entry>,
    /// Submitter side: our own entry.
    pub(crate) my_entries: Vec<Entry>,
    pub(crate) my_collateral: Option<Transaction>,
    pub(crate) final_tx: Transaction,
    pub(crate) anon: AnonAccumulator,
    pub(crate) queue: QueueBook,

    pub(crate) submitted_to: Option<RelayNode>,
    pub(crate) used_relays: Vec<OutPoint>,
    pub(crate) locked_coins: Vec<OutPoint>,
    pub(crate) relay_sig: Option<Signature>,
    pub(crate) relay_height: u64,
    pub(crate) shared_key: Option<SharedKey>,

    /// Set once the submitter falls back to direct submission.
    pub(crate) downgraded: bool,
    pub(crate) trickle_rounds: u32,
    pub(crate) count_attempts: u32,
    pub(crate) cached_last_success: u64,
    pub(crate) broadcast_txs: HashMap<Hash, BroadcastTx>,
    pub(crate) rounds: RoundsMemo,

    pub(crate) last_message: String,
    pub(crate) auto_denom_result: String,
    pub(crate) entries_count: u32,
    pub(crate) last_entry_accepted: bool,
    pub(crate) count_entries_accepted: u32,
    pub(crate) last_new_block_secs: i64,
    pub(crate) session_total_value: Amount,
    /// Target anonymized balance in whole coins.
    pub(crate) anonymize_amount: i64,
    pub(crate) completions: Vec<Completion>,
}

fn new_session_id(rng: &mut dyn RngCore) -> u32 {
    1 + rng.next_u32() % 999_999
}

impl MixingPool {
    pub fn new(config: PoolConfig, role: Role, rng: &mut dyn RngCore) -> Self {
        let session_id = if role.is_relay() {
            new_session_id(rng)
        } else {
            0
        };
        Self {
            anonymize_amount: config.anonymize_amount,
            config,
            role,
            state: PoolState::Idle,
            last_state_change_ms: 0,
            session_id,
            session_denom: 0,
            session_users: 0,
            session_found: false,
            session_collaterals: Vec::new(),
            entries: Vec::new(),
            my_entries: Vec::new(),
            my_collateral: None,
            final_tx: Transaction::default(),
            anon: AnonAccumulator::default(),
            queue: QueueBook::default(),
            submitted_to: None,
            used_relays: Vec::new(),
            locked_coins: Vec::new(),
            relay_sig: None,
            relay_height: 0,
            shared_key: None,
            downgraded: false,
            trickle_rounds: 0,
            count_attempts: 0,
            cached_last_success: 0,
            broadcast_txs: HashMap::new(),
            rounds: RoundsMemo::default(),
            last_message: String::new(),
            auto_denom_result: String::new(),
            entries_count: 0,
            last_entry_accepted: false,
            count_entries_accepted: 0,
            last_new_block_secs: 0,
            session_total_value: 0,
            completions: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_relay(&self) -> bool {
        self.role.is_relay()
    }

    pub fn relay_identity(&self) -> Option<&RelayIdentity> {
        match &self.role {
            Role::Relay(identity) => Some(identity),
            Role::Client => None,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn last_state_change_ms(&self) -> i64 {
        self.last_state_change_ms
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn session_denom(&self) -> u32 {
        self.session_denom
    }

    pub fn session_users(&self) -> usize {
        self.session_users
    }

    pub fn session_found(&self) -> bool {
        self.session_found
    }

    /// Collaterals held for the current round.
    pub fn collaterals(&self) -> &[Transaction] {
        &self.session_collaterals
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn my_entries(&self) -> &[Entry] {
        &self.my_entries
    }

    pub fn final_transaction(&self) -> &Transaction {
        &self.final_tx
    }

    pub fn anon(&self) -> &AnonAccumulator {
        &self.anon
    }

    pub fn queue(&self) -> &QueueBook {
        &self.queue
    }

    pub fn submitted_to(&self) -> Option<&RelayNode> {
        self.submitted_to.as_ref()
    }

    pub fn used_relays(&self) -> &[OutPoint] {
        &self.used_relays
    }

    pub fn locked_coins(&self) -> &[OutPoint] {
        &self.locked_coins
    }

    pub fn is_downgraded(&self) -> bool {
        self.downgraded
    }

    pub fn trickle_rounds(&self) -> u32 {
        self.trickle_rounds
    }

    pub fn cached_last_success(&self) -> u64 {
        self.cached_last_success
    }

    pub fn broadcast_tx(&self, txid: &Hash) -> Option<&BroadcastTx> {
        self.broadcast_txs.get(txid)
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn auto_denom_result(&self) -> &str {
        &self.auto_denom_result
    }

    pub fn entries_count(&self) -> u32 {
        self.entries_count
    }

    pub fn anonymize_amount(&self) -> i64 {
        self.anonymize_amount
    }

    pub fn has_shared_key(&self) -> bool {
        self.shared_key.is_some()
    }

    /// Rounds finished since the last call.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    pub(crate) fn own_vin(&self) -> Option<&TxIn> {
        self.relay_identity().map(|id| &id.vin)
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Clear the round. With `clear_everything` the submitter also forgets
    /// its entry and the relay draws a fresh session id.
    pub fn set_null(&mut self, ctx: &mut MixContext<'_>, clear_everything: bool) {
        self.final_tx = Transaction::default();
        self.entries.clear();
        self.anon.clear();
        self.trickle_rounds = 0;

        self.state = PoolState::Idle;
        self.last_state_change_ms = ctx.now_ms;

        self.entries_count = 0;
        self.last_entry_accepted = false;
        self.count_entries_accepted = 0;
        self.last_new_block_secs = 0;
        self.downgraded = false;

        self.session_users = 0;
        self.session_denom = 0;
        self.session_found = false;
        self.session_collaterals.clear();
        self.my_collateral = None;

        self.relay_sig = None;
        self.relay_height = 0;
        self.shared_key = None;

        if clear_everything {
            self.my_entries.clear();
            self.session_id = if self.is_relay() {
                new_session_id(&mut *ctx.rng)
            } else {
                0
            };
        }
        tracing::debug!(session = self.session_id, clear_everything, "pool reset");
    }

    /// Full reset: also forgets used relays and releases locked coins.
    pub fn reset(&mut self, ctx: &mut MixContext<'_>) {
        self.cached_last_success = 0;
        self.used_relays.clear();
        self.unlock_coins(ctx);
        self.set_null(ctx, true);
    }

    /// Release every coin this pool locked. Safe to call repeatedly.
    pub fn unlock_coins(&mut self, ctx: &mut MixContext<'_>) {
        for outpoint in self.locked_coins.drain(..) {
            ctx.wallet.unlock_coin(&outpoint);
        }
    }

    pub(crate) fn lock_coin(&mut self, ctx: &mut MixContext<'_>, outpoint: OutPoint) {
        ctx.wallet.lock_coin(&outpoint);
        self.locked_coins.push(outpoint);
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admit a `dsa` requester to the round, opening one if none is held.
    pub fn is_compatible_with_session(
        &mut self,
        ctx: &mut MixContext<'_>,
        denom: u32,
        collateral: Transaction,
    ) -> Result<()> {
        if denom == 0 {
            return Err(PoolError::DenominationMismatch);
        }
        if !is_collateral_valid(&*ctx.chain, &collateral) {
            return Err(PoolError::CollateralInvalid);
        }

        if self.session_users == 0 {
            self.announce_queue(ctx, denom, false)?;
            self.session_denom = denom;
            self.session_users = 1;
            self.last_state_change_ms = ctx.now_ms;
            self.entries.clear();
            self.update_state(ctx, PoolState::Queue);
            self.session_collaterals.push(collateral);
            tracing::info!(session = self.session_id, denom, "opened round");
            return Ok(());
        }

        if !matches!(self.state, PoolState::Idle | PoolState::Queue) {
            return Err(PoolError::IncompatibleMode);
        }
        if self.session_users >= self.config.max_participants {
            return Err(PoolError::QueueFull);
        }
        if denom != self.session_denom {
            return Err(PoolError::DenominationMismatch);
        }

        if self.state == PoolState::Idle {
            self.update_state(ctx, PoolState::AcceptingEntries);
        }
        self.session_users += 1;
        self.last_state_change_ms = ctx.now_ms;
        self.session_collaterals.push(collateral);
        tracing::debug!(users = self.session_users, "joined round");
        Ok(())
    }

    /// Admit an entry. Every rejection also gives back the requester's
    /// participant slot.
    pub fn add_entry(
        &mut self,
        ctx: &mut MixContext<'_>,
        inputs: Vec<TxIn>,
        amount: Amount,
        collateral: Transaction,
        outputs: Vec<TxOut>,
    ) -> Result<()> {
        let result = self.validate_entry(ctx, &inputs, amount, &collateral);
        if let Err(e) = result {
            self.session_users = self.session_users.saturating_sub(1);
            return Err(e);
        }
        self.entries.push(Entry::new(
            inputs,
            amount,
            collateral,
            outputs,
            ctx.now_secs(),
        ));
        tracing::info!(entries = self.entries.len(), "entry added");
        Ok(())
    }

    fn validate_entry(
        &self,
        ctx: &MixContext<'_>,
        inputs: &[TxIn],
        amount: Amount,
        collateral: &Transaction,
    ) -> Result<()> {
        if amount < 0 || inputs.iter().any(|i| i.prevout.is_null()) {
            return Err(PoolError::InvalidInput);
        }
        if !is_collateral_valid(&*ctx.chain, collateral) {
            return Err(PoolError::CollateralInvalid);
        }
        if self.entries.len() >= self.config.max_participants {
            return Err(PoolError::EntriesFull);
        }
        if inputs
            .iter()
            .any(|i| self.entries.iter().any(|e| e.spends(&i.prevout)))
        {
            return Err(PoolError::DuplicateInput);
        }
        Ok(())
    }

    /// Apply a signature to the joint transaction. Returns false if the
    /// signature is a replay, matches no input or does not verify.
    pub fn add_script_sig(&mut self, ctx: &MixContext<'_>, signed: &TxIn) -> bool {
        if signed.script_sig.is_empty() {
            return false;
        }
        let replay = self.entries.iter().any(|e| {
            e.inputs
                .iter()
                .any(|i| i.input.script_sig == signed.script_sig)
        });
        if replay {
            tracing::debug!(input = %signed, "signature already present");
            return false;
        }

        let Some(idx) = self
            .final_tx
            .vin
            .iter()
            .position(|v| v.prevout == signed.prevout && v.sequence == signed.sequence)
        else {
            tracing::debug!(input = %signed, "signature for unknown input");
            return false;
        };

        let mut candidate = self.final_tx.clone();
        candidate.vin[idx].script_sig = signed.script_sig.clone();
        if !ctx.chain.verify_input_signature(&candidate, idx) {
            tracing::warn!(input = %signed, "signature does not verify");
            return false;
        }

        self.final_tx.vin[idx].script_sig = signed.script_sig.clone();
        for entry in &mut self.entries {
            entry.add_sig(signed);
        }
        self.anon.add_sig(signed);
        tracing::debug!(input = %signed, "signature added");
        true
    }

    /// All inputs of the joint transaction are signed.
    pub fn signatures_complete(&self) -> bool {
        !self.final_tx.vin.is_empty() && self.final_tx.vin.iter().all(|i| i.is_signed())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the round.
    pub fn check(&mut self, ctx: &mut MixContext<'_>) {
        let max = self.config.max_participants;

        if self.state == PoolState::AcceptingEntries
            && (self.entries.len() >= max
                || (ctx.now_ms - self.last_state_change_ms > ANON_FINALIZE_DELAY_MS
                    && self.anon.count() > max * 5))
        {
            self.update_state(ctx, PoolState::FinalizeTransaction);
            self.count_attempts += 1;
        }

        if self.state == PoolState::FinalizeTransaction {
            self.update_state(ctx, PoolState::Signing);
            if self.is_relay() {
                self.final_tx = self.compose_final_transaction(&mut *ctx.rng);
                tracing::info!(
                    inputs = self.final_tx.vin.len(),
                    outputs = self.final_tx.vout.len(),
                    "requesting signatures"
                );
                ctx.outbox.broadcast(TypedMessage::Dsf(DsFinal {
                    session_id: self.session_id,
                    tx: self.final_tx.clone(),
                }));
            }
        }

        if self.is_relay() && self.state == PoolState::Transmission {
            self.check_final_transaction(ctx);
        }

        if self.is_relay() && self.state == PoolState::Signing && self.signatures_complete() {
            self.update_state(ctx, PoolState::Transmission);
        }

        if self.state.is_terminal()
            && ctx.now_ms - self.last_state_change_ms >= TERMINAL_COOLDOWN_MS
        {
            self.set_null(ctx, true);
            if self.is_relay() {
                self.relay_status(ctx, EntryStatus::Reset, String::new());
            }
            self.unlock_coins(ctx);
        }
    }

    /// Full entry table: every entry's items, outputs shuffled. Otherwise
    /// whatever arrived anonymously.
    fn compose_final_transaction(&self, rng: &mut dyn RngCore) -> Transaction {
        let mut tx = Transaction::new(Vec::new(), Vec::new());
        if self.entries.len() >= self.config.max_participants {
            for entry in &self.entries {
                tx.vout.extend(entry.tx_outputs());
                tx.vin.extend(entry.tx_inputs());
            }
            tx.vout.shuffle(rng);
            tx.vout.shuffle(rng);
        } else {
            tx.vin = self.anon.inputs().iter().map(|i| i.input.clone()).collect();
            tx.vout = self.anon.outputs().to_vec();
        }
        tx
    }

    /// Commit the signed joint transaction.
    pub fn check_final_transaction(&mut self, ctx: &mut MixContext<'_>) {
        let tx = self.final_tx.clone();

        if !ctx.chain.submit_transaction(&tx) {
            tracing::warn!(attempts = self.count_attempts, "joint transaction rejected");
            if self.count_attempts > 10 {
                self.set_null(ctx, true);
                return;
            }
            self.update_state(ctx, PoolState::AcceptingEntries);
            if self.count_attempts > 5 {
                self.relay_completed(ctx, true, "Transaction not valid, please try again");
                self.downgraded = true;
            }
            return;
        }

        let Some(identity) = self.relay_identity() else {
            return;
        };
        let Some(key) = identity.node_key.clone() else {
            tracing::error!("relay key unavailable, cannot sign broadcast");
            return;
        };
        let vin = identity.vin.clone();

        let txid = tx.txid();
        let sig_time = ctx.now_secs();
        let sig = sign_message(&key, &BroadcastTx::signing_message(&txid, sig_time));
        self.broadcast_txs.entry(txid).or_insert(BroadcastTx {
            tx,
            vin,
            sig,
            sig_time,
        });

        tracing::info!(txid = %hex::encode(txid), session = self.session_id, "joint transaction committed");
        self.relay_completed(ctx, false, "Transaction created successfully.");
        self.charge_random_fees(ctx);
        self.set_null(ctx, true);
        self.unlock_coins(ctx);
    }

    fn relay_completed(&mut self, ctx: &mut MixContext<'_>, error: bool, message: &str) {
        ctx.outbox.broadcast(TypedMessage::Dsc(DsComplete {
            session_id: self.session_id,
            error,
            message: message.to_string(),
        }));
        self.completions.push(Completion {
            session_id: self.session_id,
            error,
            message: message.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    /// Expire queue items and entries, and reset stalled rounds.
    pub fn check_timeout(&mut self, ctx: &mut MixContext<'_>) {
        if !self.config.enabled && !self.is_relay() {
            return;
        }

        if !self.is_relay() && self.state == PoolState::Transmission {
            self.check(ctx);
        }

        if let Some(expired) = self.queue.remove_expired_one(ctx.now_secs()) {
            tracing::debug!(relay = %expired.vin, "queue announcement expired");
        }

        let lag = if self.is_relay() { 0 } else { CLIENT_LAG_MS };

        match self.state {
            PoolState::Queue | PoolState::AcceptingEntries => {
                self.expire_entries(ctx);
                self.check_queue_timeout(ctx, lag);
            }
            PoolState::Signing => {
                if ctx.now_ms - self.last_state_change_ms >= SIGNING_TIMEOUT_MS + lag {
                    self.signing_timeout(ctx);
                }
            }
            PoolState::Idle => {}
            PoolState::FinalizeTransaction
            | PoolState::Transmission
            | PoolState::Error
            | PoolState::Success => {
                if ctx.now_ms - self.last_state_change_ms >= QUEUE_TIMEOUT_MS + lag {
                    tracing::info!(state = %self.state, "session timed out");
                    self.set_null(ctx, true);
                    self.unlock_coins(ctx);
                    self.apply_state(ctx, PoolState::Error);
                    self.last_message = "Session timed out (30 seconds), please resubmit.".into();
                }
            }
        }
    }

    fn expire_entries(&mut self, ctx: &mut MixContext<'_>) {
        let now = ctx.now_secs();
        loop {
            let list = if self.is_relay() {
                &mut self.entries
            } else {
                &mut self.my_entries
            };
            let Some(idx) = list.iter().position(|e| e.is_expired(now)) else {
                break;
            };
            list.remove(idx);
            tracing::debug!("entry expired");

            if self.entries.is_empty() && self.my_entries.is_empty() {
                self.set_null(ctx, true);
                self.unlock_coins(ctx);
            }
            if self.is_relay() {
                self.relay_status(ctx, EntryStatus::Reset, String::new());
            }
        }
    }

    fn check_queue_timeout(&mut self, ctx: &mut MixContext<'_>, lag: i64) {
        if !matches!(self.state, PoolState::Queue | PoolState::AcceptingEntries) {
            return;
        }
        let elapsed = ctx.now_ms - self.last_state_change_ms;

        if !self.is_relay()
            && !self.downgraded
            && self.state == PoolState::AcceptingEntries
            && elapsed >= DOWNGRADE_TIMEOUT_MS + lag
        {
            self.last_state_change_ms = ctx.now_ms;
            self.downgrade(ctx);
            return;
        }

        if elapsed >= QUEUE_TIMEOUT_MS + lag {
            tracing::info!(state = %self.state, users = self.session_users, "queue timed out");
            self.last_state_change_ms = ctx.now_ms;
            self.charge_fees(ctx);

            self.session_users = 0;
            self.session_denom = 0;
            self.session_found = false;
            self.session_collaterals.clear();

            if self.entries.is_empty() && self.my_entries.is_empty() {
                self.set_null(ctx, true);
                self.unlock_coins(ctx);
                if self.is_relay() {
                    self.relay_status(ctx, EntryStatus::Reset, String::new());
                }
            } else {
                self.update_state(ctx, PoolState::AcceptingEntries);
            }
        }
    }

    fn signing_timeout(&mut self, ctx: &mut MixContext<'_>) {
        if self.downgraded || self.is_relay() {
            tracing::info!("signing timed out");
            self.charge_fees(ctx);
            self.set_null(ctx, true);
            self.unlock_coins(ctx);
            self.apply_state(ctx, PoolState::Error);
            self.last_message = "Signing timed out, please resubmit.".into();
        } else {
            tracing::info!("signing timed out, downgrading");
            self.downgrade(ctx);
            self.final_tx = Transaction::default();
            self.update_state(ctx, PoolState::AcceptingEntries);
            self.last_message = "Downgrading and trying again.".into();
        }
    }

    // -----------------------------------------------------------------------
    // Queue announcements
    // -----------------------------------------------------------------------

    /// Once the queue holds `max_participants`, open for entries and
    /// announce the round as ready, handing out the shared key.
    pub fn check_for_complete_queue(&mut self, ctx: &mut MixContext<'_>) {
        if !self.is_relay() {
            return;
        }
        if self.state != PoolState::Queue || self.session_users != self.config.max_participants
        {
            return;
        }
        self.update_state(ctx, PoolState::AcceptingEntries);
        if self.shared_key.is_none() {
            self.shared_key = Some(SharedKey::generate(&mut *ctx.rng));
        }
        let denom = self.session_denom;
        if let Err(e) = self.announce_queue(ctx, denom, true) {
            tracing::error!(error = %e, "could not announce ready queue");
        }
    }

    /// Sign and broadcast a queue announcement for our own vin.
    fn announce_queue(&mut self, ctx: &mut MixContext<'_>, denom: u32, ready: bool) -> Result<()> {
        let identity = self.relay_identity().ok_or(PoolError::NotRelay)?;
        let key = identity
            .node_key
            .as_ref()
            .ok_or(PoolError::RelayKeyUnavailable)?;
        let mut dsq = QueueAnnouncement {
            vin: identity.vin.clone(),
            denom,
            time: ctx.now_secs(),
            ready,
            sig: None,
            relay_sig: None,
            block_height: 0,
            shared_key: if ready { self.shared_key.clone() } else { None },
        };
        queue::sign_queue(&mut dsq, key, ctx.chain.best_height());
        tracing::debug!(denom, ready, "announcing queue");
        ctx.outbox.broadcast(TypedMessage::Dsq(dsq));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Block hook
    // -----------------------------------------------------------------------

    /// React to a new best block. Calls closer than 10 s apart are ignored.
    pub fn new_block(&mut self, ctx: &mut MixContext<'_>, height: u64) {
        let now = ctx.now_secs();
        if now - self.last_new_block_secs < 10 {
            return;
        }
        self.last_new_block_secs = now;

        self.check_timeout(ctx);

        if !self.config.enabled {
            return;
        }
        if !self.is_relay() && height % 10 == 0 {
            self.unlock_coins(ctx);
        }
    }

    /// Forget used relays once they make up a fifth of the directory.
    pub fn prune_used_relays(&mut self, directory_len: usize) {
        if self.used_relays.len() > directory_len / 5 {
            tracing::debug!(used = self.used_relays.len(), "clearing used relay list");
            self.used_relays.clear();
        }
    }
}

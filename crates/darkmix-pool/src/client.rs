//! Submitter side of a round.

use darkmix_ports::PreparedEntry;
use darkmix_transport::messages::{DsEntry, DsSignatures, DsStatus, TypedMessage};
use darkmix_types::{EntryStatus, PoolState, Transaction, TxIn, TxOut};
use rand::seq::SliceRandom;

use crate::entry::Entry;
use crate::session::Completion;
use crate::{
    MixContext, MixingPool, PoolError, Result, DOWNGRADE_AFTER_TRICKLES, MAX_SIGS_PER_ROUND,
};

impl MixingPool {
    /// Mirror a `dssu` from the relay we submitted to.
    pub fn status_update(&mut self, ctx: &mut MixContext<'_>, status: &DsStatus) -> Result<()> {
        if self.is_relay() || self.state.is_terminal() {
            return Ok(());
        }
        let new_state = PoolState::from_code(status.state).map_err(|_| PoolError::InvalidInput)?;
        let accepted = EntryStatus::from_code(status.accepted).map_err(|_| PoolError::InvalidInput)?;

        self.apply_state(ctx, new_state);
        self.entries_count = status.entries;

        if !status.error.is_empty() {
            self.auto_denom_result = format!("Relay: {}", status.error);
        }

        match accepted {
            EntryStatus::Rejected => {
                self.last_entry_accepted = false;
                self.apply_state(ctx, PoolState::Error);
                self.last_message = status.error.clone();
            }
            EntryStatus::Accepted => {
                self.last_entry_accepted = true;
                self.count_entries_accepted += 1;
                self.session_id = status.session_id;
                self.session_found = true;
                tracing::debug!(session = self.session_id, "session found");
            }
            EntryStatus::Reset => {}
        }

        if new_state == PoolState::AcceptingEntries {
            match accepted {
                EntryStatus::Accepted => {
                    tracing::info!("entry accepted, waiting for the queue to fill");
                    self.apply_state(ctx, PoolState::Queue);
                }
                EntryStatus::Rejected if self.session_id == 0 && !self.session_found => {
                    tracing::info!("relay refused us, trying another");
                    self.unlock_coins(ctx);
                    self.apply_state(ctx, PoolState::AcceptingEntries);
                    self.do_automatic_denominating(ctx, false);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Handle `dsc`: the round we took part in finished.
    pub fn completed_transaction(&mut self, ctx: &mut MixContext<'_>, error: bool, message: &str) {
        if self.is_relay() {
            return;
        }
        let session_id = self.session_id;
        if error {
            tracing::warn!(message, "round failed");
            self.apply_state(ctx, PoolState::Error);
            self.check(ctx);
            self.unlock_coins(ctx);
        } else {
            tracing::info!(message, "round succeeded");
            self.apply_state(ctx, PoolState::Success);
            self.my_entries.clear();
            self.unlock_coins(ctx);
            self.set_null(ctx, true);
            self.cached_last_success = ctx.chain.best_height();
        }
        self.last_message = message.to_string();
        self.completions.push(Completion {
            session_id,
            error,
            message: message.to_string(),
        });
    }

    /// Ask the wallet for this round's entry and submit it.
    pub fn prepare_denominate(&mut self, ctx: &mut MixContext<'_>) -> Result<()> {
        let prepared = match ctx
            .wallet
            .prepare_denominate(self.session_denom, 0, self.config.rounds)
        {
            Ok(prepared) => prepared,
            Err(e) => {
                self.auto_denom_result = e.to_string();
                tracing::warn!(error = %e, "could not prepare entry");
                return Err(e.into());
            }
        };
        self.send_denominate(ctx, prepared)
    }

    /// Lock the entry's coins, record it and start trickling it.
    pub fn send_denominate(&mut self, ctx: &mut MixContext<'_>, prepared: PreparedEntry) -> Result<()> {
        if self.is_relay() {
            return Err(PoolError::IncompatibleMode);
        }
        let collateral = self
            .my_collateral
            .clone()
            .ok_or(PoolError::CollateralInvalid)?;

        for input in collateral.vin.iter().chain(prepared.inputs.iter()) {
            self.lock_coin(ctx, input.prevout);
        }

        if !self.session_found {
            tracing::warn!("no relay selected yet");
            self.unlock_coins(ctx);
            self.set_null(ctx, true);
            return Ok(());
        }

        self.update_state(ctx, PoolState::AcceptingEntries);
        self.last_message.clear();

        let check = Transaction::new(prepared.inputs.clone(), prepared.outputs.clone());
        if !ctx.chain.acceptable_inputs(&check) {
            tracing::warn!("entry inputs not acceptable to the mempool");
            return Err(PoolError::TransactionInvalid);
        }

        self.session_total_value = prepared.amount;
        self.my_entries.push(Entry::new(
            prepared.inputs,
            prepared.amount,
            collateral,
            prepared.outputs,
            ctx.now_secs(),
        ));
        tracing::info!(value = self.session_total_value, "entry recorded");

        self.trickle(ctx);
        self.check(ctx);
        Ok(())
    }

    /// Give up on anonymous submission and send the entry straight to the
    /// session relay. Returns false only when there is nothing to send.
    pub fn downgrade(&mut self, ctx: &mut MixContext<'_>) -> bool {
        if self.downgraded {
            return true;
        }
        let Some(entry) = self.my_entries.first() else {
            return false;
        };
        self.downgraded = true;
        tracing::info!("downgrading to direct submission");

        let msg = TypedMessage::Dsi(DsEntry {
            inputs: entry.tx_inputs(),
            amount: entry.amount,
            collateral: entry.collateral.clone(),
            outputs: entry.tx_outputs(),
        });
        if let Some(relay) = &self.submitted_to {
            if !ctx.outbox.send_to_addr(relay.addr, msg) {
                tracing::warn!(addr = %relay.addr, "session relay unreachable");
            }
        }
        true
    }

    /// Resend a random prefix of our least-sent items, mixed with items of
    /// the joint transaction, through relay envelopes.
    pub fn trickle(&mut self, ctx: &mut MixContext<'_>) -> bool {
        if self.trickle_rounds >= DOWNGRADE_AFTER_TRICKLES {
            self.downgrade(ctx);
            return true;
        }
        let n_max = (self.trickle_rounds * 3).max(15) + 3;
        let Some(entry) = self.my_entries.first_mut() else {
            return false;
        };

        entry.inputs.sort_by_key(|i| i.sent_times);
        entry.outputs.sort_by_key(|o| o.sent_times);

        let mut vin: Vec<TxIn> = Vec::new();
        for input in &mut entry.inputs {
            if vin.len() as u32 >= ctx.rand_below(n_max) + 5 {
                break;
            }
            input.sent_times += 1;
            vin.push(input.input.clone());
        }
        let mut vout: Vec<TxOut> = Vec::new();
        for output in &mut entry.outputs {
            if vout.len() as u32 >= ctx.rand_below(n_max) + 5 {
                break;
            }
            output.sent_times += 1;
            vout.push(output.output.clone());
        }

        for input in &self.final_tx.vin {
            if ctx.rand_below(100) > 75 {
                vin.push(input.clone());
            }
        }
        for output in &self.final_tx.vout {
            if ctx.rand_below(100) > 75 {
                vout.push(output.clone());
            }
        }

        vin.shuffle(&mut *ctx.rng);
        vout.shuffle(&mut *ctx.rng);

        tracing::debug!(inputs = vin.len(), outputs = vout.len(), "trickling");
        self.relay_in_anon(ctx, &vin, &vout);
        self.trickle_rounds += 1;
        true
    }

    /// Check our items in the joint transaction and sign our inputs.
    /// Returns false if we refuse to sign.
    pub fn sign_final_transaction(&mut self, ctx: &mut MixContext<'_>, tx: Transaction) -> bool {
        if self.is_relay() {
            return false;
        }
        self.final_tx = tx;

        let mut sigs: Vec<TxIn> = Vec::new();
        let my_entries = self.my_entries.clone();
        for entry in &my_entries {
            for mine in &entry.inputs {
                let Some(idx) = self.final_tx.vin.iter().position(|v| mine.matches(v)) else {
                    continue;
                };
                if self.final_tx.vin[idx].is_signed() {
                    continue;
                }
                if sigs.len() >= MAX_SIGS_PER_ROUND {
                    break;
                }

                let mut found = 0;
                let mut value_found = 0;
                for out in &self.final_tx.vout {
                    for o in &entry.outputs {
                        if o.output == *out {
                            found += 1;
                            value_found += out.value;
                        }
                    }
                }
                if found < entry.outputs.len() || value_found != entry.output_value() {
                    tracing::warn!(
                        found,
                        expected = entry.outputs.len(),
                        "joint transaction is missing our outputs, refusing to sign"
                    );
                    self.trickle(ctx);
                    return false;
                }

                match ctx.wallet.sign_input(&self.final_tx, idx) {
                    Some(script) => self.final_tx.vin[idx].script_sig = script,
                    None => tracing::warn!(input = %mine.input, "unable to sign own input"),
                }
                sigs.push(self.final_tx.vin[idx].clone());
            }
        }

        if !self.downgraded {
            for input in &self.final_tx.vin {
                if ctx.rand_below(100) > 75 && input.is_signed() {
                    sigs.push(input.clone());
                }
            }
            sigs.shuffle(&mut *ctx.rng);
            tracing::debug!(count = sigs.len(), "relaying signatures");
            self.relay_signatures_anon(ctx, &sigs);
        } else if !sigs.is_empty() {
            if let Some(relay) = &self.submitted_to {
                let msg = TypedMessage::Dss(DsSignatures { inputs: sigs });
                if !ctx.outbox.send_to_addr(relay.addr, msg) {
                    tracing::warn!(addr = %relay.addr, "session relay unreachable");
                }
            }
        }
        true
    }
}

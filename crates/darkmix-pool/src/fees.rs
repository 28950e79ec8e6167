//! Collateral charging.
//!
//! A participant that stalls a round forfeits its collateral. Honest
//! participants also pay one now and then, so a charge on its own does
//! not tell anyone who misbehaved.

use darkmix_types::{PoolState, Transaction};

use crate::{MixContext, MixingPool};

impl MixingPool {
    /// Charge at most one participant that stalled the round.
    pub fn charge_fees(&mut self, ctx: &mut MixContext<'_>) {
        if !self.is_relay() {
            return;
        }
        if ctx.rand_below(100) > 33 {
            return;
        }

        let offenders: Vec<Transaction> = match self.state {
            PoolState::AcceptingEntries => self
                .session_collaterals
                .iter()
                .filter(|c| !self.entries.iter().any(|e| e.collateral == **c))
                .cloned()
                .collect(),
            // One offence per unsigned input.
            PoolState::Signing => self
                .entries
                .iter()
                .flat_map(|e| {
                    e.inputs
                        .iter()
                        .filter(|i| !i.has_sig)
                        .map(move |_| e.collateral.clone())
                })
                .collect(),
            _ => Vec::new(),
        };
        if offenders.is_empty() {
            return;
        }

        let max = self.config.max_participants;
        let r = ctx.rand_below(100);
        if offenders.len() >= max.saturating_sub(1) && r > 33 {
            return;
        }
        // Everybody stalled; most likely our own problem.
        if offenders.len() >= max {
            return;
        }

        let target = if offenders.len() > 1 { 50 } else { 0 };
        for collateral in &offenders {
            if ctx.rand_below(100) > target {
                if ctx.chain.submit_transaction(collateral) {
                    tracing::info!(txid = %hex::encode(collateral.txid()), "charged collateral");
                } else {
                    tracing::warn!("collateral charge rejected by the mempool");
                }
                return;
            }
        }
    }

    /// After a successful round, charge each collateral with a 2% chance.
    pub fn charge_random_fees(&mut self, ctx: &mut MixContext<'_>) {
        if !self.is_relay() {
            return;
        }
        for collateral in &self.session_collaterals {
            if ctx.rand_below(1000) > 20 {
                continue;
            }
            if ctx.chain.submit_transaction(collateral) {
                tracing::info!(txid = %hex::encode(collateral.txid()), "charged random fee");
            } else {
                tracing::warn!("random fee rejected by the mempool");
            }
        }
    }
}

//! Relay envelopes.
//!
//! A submitter hides which items belong together by sending each one in
//! its own envelope through other relays. The envelope carries the session
//! relay's freshness signature, which forwarders check, and a MAC under the
//! round's shared key, which only the session relay can check.

use darkmix_crypto::signer::verify_message;
use darkmix_transport::messages::TypedMessage;
use darkmix_types::{EntryStatus, RelayEnvelope, RelayItem, TxIn, TxOut};

use crate::queue::height_message;
use crate::{
    MixContext, MixingPool, PoolError, Result, MAX_FORWARDER_RANK, MAX_RELAY_SIG_AGE,
    PENALTY_BAD_RELAY_SIG, PENALTY_BAD_SHARED_SIG,
};

/// Forwarders per envelope.
const FORWARDERS: usize = 2;

fn check_fresh(ctx: &MixContext<'_>, env: &RelayEnvelope) -> Result<()> {
    let best = ctx.chain.best_height();
    if best.saturating_sub(env.block_height) > MAX_RELAY_SIG_AGE {
        return Err(PoolError::StaleSignature {
            height: env.block_height,
            best,
        });
    }
    Ok(())
}

fn check_item(item: &RelayItem) -> Result<()> {
    match item {
        RelayItem::In(input) | RelayItem::Sig(input) if input.prevout.is_null() => {
            Err(PoolError::InvalidInput)
        }
        RelayItem::Out(output) if output.script_pubkey.is_empty() => {
            Err(PoolError::InvalidScript)
        }
        _ => Ok(()),
    }
}

impl MixingPool {
    /// Wrap `item` for the relay we submitted to. `None` until that relay
    /// has announced its round as ready.
    pub(crate) fn build_envelope(&self, item: RelayItem) -> Option<RelayEnvelope> {
        let relay = self.submitted_to.as_ref()?;
        let relay_sig = self.relay_sig?;
        let key = self.shared_key.as_ref()?;
        let shared_sig = key.sign(&item.mac_material());
        Some(RelayEnvelope {
            target: relay.vin.clone(),
            relay_sig,
            block_height: self.relay_height,
            item,
            shared_sig,
        })
    }

    /// Hand `env` to two distinct relays drawn from the top of the ranking.
    pub(crate) fn send_envelope(&self, ctx: &mut MixContext<'_>, env: &RelayEnvelope) {
        let pool_size = ctx.directory.count_enabled().min(MAX_FORWARDER_RANK);
        if pool_size == 0 {
            tracing::warn!("no relays to forward through");
            return;
        }

        let mut ranks: Vec<usize> = Vec::with_capacity(FORWARDERS);
        let mut tries = 0;
        while ranks.len() < FORWARDERS.min(pool_size) && tries < 10 {
            tries += 1;
            let rank = 1 + ctx.rand_below(pool_size as u32) as usize;
            if !ranks.contains(&rank) {
                ranks.push(rank);
            }
        }

        for rank in ranks {
            let Some(node) =
                ctx.directory
                    .by_rank(rank, env.block_height, self.config.min_protocol)
            else {
                continue;
            };
            if !ctx
                .outbox
                .send_to_addr(node.addr, TypedMessage::Dsr(env.clone()))
            {
                tracing::debug!(addr = %node.addr, "forwarder unreachable");
            }
        }
    }

    /// Send inputs and outputs anonymously, one envelope each.
    pub fn relay_in_anon(&self, ctx: &mut MixContext<'_>, inputs: &[TxIn], outputs: &[TxOut]) {
        let items = inputs
            .iter()
            .cloned()
            .map(RelayItem::In)
            .chain(outputs.iter().cloned().map(RelayItem::Out));
        for item in items {
            let Some(env) = self.build_envelope(item) else {
                tracing::debug!("no ready session to relay through");
                return;
            };
            self.send_envelope(ctx, &env);
        }
    }

    /// Send signed inputs anonymously.
    pub fn relay_signatures_anon(&self, ctx: &mut MixContext<'_>, signed: &[TxIn]) {
        for input in signed {
            let Some(env) = self.build_envelope(RelayItem::Sig(input.clone())) else {
                return;
            };
            self.send_envelope(ctx, &env);
        }
    }

    /// Handle `dsr`: check the target's freshness proof and pass the
    /// envelope on as `dsai`.
    pub fn forward_envelope(&mut self, ctx: &mut MixContext<'_>, env: RelayEnvelope) -> Result<()> {
        let own = self.own_vin().cloned().ok_or(PoolError::NotRelay)?;
        check_fresh(ctx, &env)?;
        check_item(&env.item)?;

        let target = ctx
            .directory
            .find(&env.target.prevout)
            .ok_or(PoolError::UnknownRelay)?;

        let best = ctx.chain.best_height();
        let rank = ctx
            .directory
            .rank(&own.prevout, best, self.config.min_protocol)
            .unwrap_or(usize::MAX);
        if rank > MAX_FORWARDER_RANK {
            return Err(PoolError::RankTooLow { rank });
        }

        if verify_message(
            &target.node_key,
            &env.relay_sig,
            &height_message(env.block_height),
        )
        .is_err()
        {
            return Err(PoolError::misbehavior(
                "bad relay freshness signature",
                PENALTY_BAD_RELAY_SIG,
            ));
        }

        tracing::debug!(target = %target.vin, kind = ?env.item.kind(), "forwarding envelope");
        if !ctx.outbox.send_to_addr(target.addr, TypedMessage::Dsai(env)) {
            tracing::warn!(addr = %target.addr, "session relay unreachable");
        }
        Ok(())
    }

    /// Handle `dsai`: verify both signatures and add the item to the round.
    pub fn accept_envelope(&mut self, ctx: &mut MixContext<'_>, env: RelayEnvelope) -> Result<()> {
        let identity = self.relay_identity().ok_or(PoolError::NotRelay)?;
        check_fresh(ctx, &env)?;
        let shared_key = self.shared_key.clone().ok_or(PoolError::NoSharedKey)?;
        check_item(&env.item)?;
        if env.target.prevout != identity.vin.prevout {
            return Err(PoolError::WrongRelay);
        }
        let node_key = identity
            .node_key
            .as_ref()
            .ok_or(PoolError::RelayKeyUnavailable)?
            .verifying_key();

        if verify_message(&node_key, &env.relay_sig, &height_message(env.block_height)).is_err() {
            return Err(PoolError::misbehavior(
                "bad relay freshness signature",
                PENALTY_BAD_RELAY_SIG,
            ));
        }
        if shared_key
            .verify(&env.item.mac_material(), &env.shared_sig)
            .is_err()
        {
            return Err(PoolError::misbehavior(
                "bad shared-key signature",
                PENALTY_BAD_SHARED_SIG,
            ));
        }

        if self.session_users < self.config.max_participants {
            return Err(PoolError::SessionNotComplete);
        }

        match env.item {
            RelayItem::In(input) => {
                self.anon.add_input(input, &mut *ctx.rng);
            }
            RelayItem::Out(output) => {
                self.anon.add_output(output, &mut *ctx.rng);
            }
            RelayItem::Sig(signed) => {
                if !self.add_script_sig(ctx, &signed) {
                    tracing::debug!(input = %signed, "anonymous signature not applied");
                }
            }
        }

        self.relay_status(ctx, EntryStatus::Accepted, String::new());
        self.check(ctx);
        Ok(())
    }
}

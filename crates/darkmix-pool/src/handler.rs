//! Wire message dispatch.
//!
//! [`MixingPool::process_message`] is the single entry point for mixing
//! messages from peers. Rejections a submitter should learn about are
//! answered with a `dssu`; every error is also returned so the caller can
//! log it, and misbehaviour scores are reported to the outbox here.

use darkmix_denom::codec::denominations_of_outputs;
use darkmix_denom::POOL_MAX;
use darkmix_transport::messages::{
    DsAccept, DsComplete, DsEntry, DsFinal, DsSignatures, DsStatus, TypedMessage,
};
use darkmix_transport::peer::PeerInfo;
use darkmix_types::{Amount, EntryStatus, PoolState, QueueAnnouncement, Transaction};

use crate::queue::{check_signature, is_expired};
use crate::{MixContext, MixingPool, PoolError, Result};

impl MixingPool {
    /// Handle one mixing message from `peer`. Election messages are left
    /// to the payment election and ignored here.
    pub fn process_message(
        &mut self,
        ctx: &mut MixContext<'_>,
        peer: &PeerInfo,
        msg: TypedMessage,
    ) -> Result<()> {
        if msg.is_election() {
            return Ok(());
        }
        let command = msg.command();
        let result = self.dispatch(ctx, peer, msg);
        if let Err(e) = &result {
            if let Some(score) = e.penalty() {
                ctx.outbox.misbehaving(peer.id, score);
            }
            if e.is_contention() {
                tracing::debug!(command, peer = %peer.addr, error = %e, "rejected");
            } else {
                tracing::warn!(command, peer = %peer.addr, error = %e, "rejected");
            }
        }
        result
    }

    fn dispatch(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, msg: TypedMessage) -> Result<()> {
        match msg {
            TypedMessage::Dsa(dsa) => self.handle_dsa(ctx, peer, dsa),
            TypedMessage::Dsq(dsq) => self.handle_dsq(ctx, peer, dsq),
            TypedMessage::Dsi(dsi) => self.handle_dsi(ctx, peer, dsi),
            TypedMessage::Dsr(env) => {
                self.require_version(peer)?;
                self.forward_envelope(ctx, env)
            }
            TypedMessage::Dsai(env) => {
                self.require_version(peer)?;
                self.accept_envelope(ctx, env)
            }
            TypedMessage::Dssu(status) => self.handle_dssu(ctx, peer, &status),
            TypedMessage::Dss(dss) => self.handle_dss(ctx, peer, dss),
            TypedMessage::Dsf(dsf) => self.handle_dsf(ctx, peer, dsf),
            TypedMessage::Dsc(dsc) => self.handle_dsc(ctx, peer, dsc),
            TypedMessage::MnGet(_) | TypedMessage::Mnw(_) => Ok(()),
        }
    }

    fn require_version(&self, peer: &PeerInfo) -> Result<()> {
        if peer.version < self.config.min_protocol {
            return Err(PoolError::IncompatibleVersion);
        }
        Ok(())
    }

    /// Answer `peer` with a rejecting `dssu` and hand the error back.
    fn reject(&self, ctx: &mut MixContext<'_>, peer: &PeerInfo, err: PoolError) -> Result<()> {
        let status = self.status_message(EntryStatus::Rejected, err.to_string());
        ctx.outbox.send(peer.id, TypedMessage::Dssu(status));
        Err(err)
    }

    fn accept(&self, ctx: &mut MixContext<'_>, peer: &PeerInfo) {
        let status = self.status_message(EntryStatus::Accepted, String::new());
        ctx.outbox.send(peer.id, TypedMessage::Dssu(status));
    }

    /// The sender is the relay we submitted to.
    fn from_submitted_relay(&self, peer: &PeerInfo) -> bool {
        self.submitted_to
            .as_ref()
            .is_some_and(|relay| relay.addr.ip() == peer.addr.ip())
    }

    fn handle_dsa(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, dsa: DsAccept) -> Result<()> {
        if let Err(e) = self.require_version(peer) {
            return self.reject(ctx, peer, e);
        }
        let Some(vin) = self.own_vin().cloned() else {
            return self.reject(ctx, peer, PoolError::NotRelay);
        };
        let Some(me) = ctx.directory.find(&vin.prevout) else {
            return self.reject(ctx, peer, PoolError::NotInDirectory);
        };

        if self.session_users == 0 {
            let count_above = ctx.directory.count_above_protocol(self.config.min_protocol);
            if me.queued_too_recently(ctx.directory.dsq_count(), count_above) {
                return self.reject(ctx, peer, PoolError::TooRecent);
            }
        }

        if let Err(e) = self.is_compatible_with_session(ctx, dsa.denom, dsa.collateral) {
            return self.reject(ctx, peer, e);
        }
        self.accept(ctx, peer);
        self.check_for_complete_queue(ctx);
        Ok(())
    }

    fn handle_dsq(
        &mut self,
        ctx: &mut MixContext<'_>,
        peer: &PeerInfo,
        dsq: QueueAnnouncement,
    ) -> Result<()> {
        self.require_version(peer)?;
        let relay = ctx
            .directory
            .find(&dsq.vin.prevout)
            .ok_or(PoolError::UnknownRelay)?;
        if !check_signature(&dsq, &relay) {
            return Err(PoolError::InvalidSignature);
        }
        if is_expired(&dsq, ctx.now_secs()) {
            tracing::debug!(relay = %relay.addr, "expired queue announcement");
            return Ok(());
        }

        if dsq.ready {
            let ours = self
                .submitted_to
                .as_ref()
                .is_some_and(|r| r.vin.prevout == dsq.vin.prevout);
            if !ours {
                tracing::debug!(relay = %relay.addr, "ready queue from another relay");
                return Ok(());
            }
            // The relay's state reset for the new round can overtake the
            // ready announcement.
            let waiting = matches!(self.state, PoolState::Queue | PoolState::AcceptingEntries);
            if !waiting || !self.my_entries.is_empty() {
                return Ok(());
            }
            let shared_key = dsq.shared_key.ok_or(PoolError::NoSharedKey)?;
            self.relay_sig = dsq.relay_sig;
            self.relay_height = dsq.block_height;
            self.shared_key = Some(shared_key);
            tracing::info!(relay = %relay.addr, "queue is ready");
            return self.prepare_denominate(ctx);
        }

        if self.queue.contains_vin(&dsq.vin) {
            tracing::debug!(relay = %relay.addr, "duplicate queue announcement");
            return Ok(());
        }
        let count_above = ctx.directory.count_above_protocol(self.config.min_protocol);
        if relay.queued_too_recently(ctx.directory.dsq_count(), count_above) {
            tracing::debug!(relay = %relay.addr, "relay sending too many queues");
            return Ok(());
        }
        ctx.directory.mark_dsq(&dsq.vin.prevout);
        tracing::debug!(relay = %relay.addr, denom = dsq.denom, "new queue announcement");
        self.queue.push(dsq.clone());
        ctx.outbox.broadcast(TypedMessage::Dsq(dsq));
        Ok(())
    }

    fn handle_dsi(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, dsi: DsEntry) -> Result<()> {
        if let Err(e) = self.require_version(peer) {
            return self.reject(ctx, peer, e);
        }
        if !self.is_relay() {
            return self.reject(ctx, peer, PoolError::NotRelay);
        }
        if let Err(e) = self.check_direct_entry(ctx, &dsi) {
            return self.reject(ctx, peer, e);
        }

        let DsEntry {
            inputs,
            amount,
            collateral,
            outputs,
        } = dsi;
        if let Err(e) = self.add_entry(ctx, inputs, amount, collateral, outputs) {
            return self.reject(ctx, peer, e);
        }
        self.accept(ctx, peer);
        self.check(ctx);
        self.relay_status(ctx, EntryStatus::Reset, String::new());
        Ok(())
    }

    /// Checks a direct entry has to pass before admission.
    fn check_direct_entry(&self, ctx: &MixContext<'_>, dsi: &DsEntry) -> Result<()> {
        if self.session_users < self.config.max_participants {
            return Err(PoolError::SessionNotComplete);
        }

        let denom = denominations_of_outputs(&dsi.outputs);
        if denom != self.session_denom
            || self
                .entries
                .iter()
                .any(|e| denominations_of_outputs(&e.tx_outputs()) != denom)
        {
            return Err(PoolError::IncompatibleEntries);
        }

        for out in &dsi.outputs {
            if out.script_pubkey.as_bytes().len() != 25 {
                return Err(PoolError::NonStandardScript);
            }
            if !out.script_pubkey.is_normal_payment_script() {
                return Err(PoolError::InvalidScript);
            }
        }

        let mut value_in: Amount = 0;
        let mut missing = false;
        for input in &dsi.inputs {
            match ctx.chain.output_value(&input.prevout) {
                Some(value) => value_in += value,
                None => missing = true,
            }
        }
        if value_in > POOL_MAX {
            return Err(PoolError::ValueTooHigh);
        }
        if missing {
            return Err(PoolError::MissingInputs);
        }
        let value_out: Amount = dsi.outputs.iter().map(|o| o.value).sum();
        if (value_in - value_out) * 100 > value_in {
            return Err(PoolError::FeesTooHigh);
        }

        let tx = Transaction::new(dsi.inputs.clone(), dsi.outputs.clone());
        if !ctx.chain.acceptable_inputs(&tx) {
            return Err(PoolError::TransactionInvalid);
        }
        Ok(())
    }

    fn handle_dssu(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, status: &DsStatus) -> Result<()> {
        self.require_version(peer)?;
        if !self.from_submitted_relay(peer) {
            return Ok(());
        }
        let decided = status.accepted == EntryStatus::Accepted.code()
            || status.accepted == EntryStatus::Rejected.code();
        if !decided && status.session_id != self.session_id {
            tracing::debug!(
                ours = self.session_id,
                theirs = status.session_id,
                "status for another session"
            );
            return Ok(());
        }
        self.status_update(ctx, status)
    }

    fn handle_dss(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, dss: DsSignatures) -> Result<()> {
        self.require_version(peer)?;
        if !self.is_relay() {
            return Ok(());
        }
        let mut applied = false;
        for signed in &dss.inputs {
            if self.add_script_sig(ctx, signed) {
                applied = true;
            }
        }
        if applied {
            self.check(ctx);
            self.relay_status(ctx, EntryStatus::Reset, String::new());
        }
        Ok(())
    }

    fn handle_dsf(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, dsf: DsFinal) -> Result<()> {
        self.require_version(peer)?;
        if self.is_relay() || !self.from_submitted_relay(peer) {
            return Ok(());
        }
        if dsf.session_id != self.session_id {
            return Err(PoolError::SessionMismatch);
        }
        self.sign_final_transaction(ctx, dsf.tx);
        Ok(())
    }

    fn handle_dsc(&mut self, ctx: &mut MixContext<'_>, peer: &PeerInfo, dsc: DsComplete) -> Result<()> {
        self.require_version(peer)?;
        if self.is_relay() || !self.from_submitted_relay(peer) {
            return Ok(());
        }
        if dsc.session_id != self.session_id {
            return Err(PoolError::SessionMismatch);
        }
        self.completed_transaction(ctx, dsc.error, &dsc.message);
        Ok(())
    }
}

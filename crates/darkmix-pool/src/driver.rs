//! Automatic denomination and relay selection.
//!
//! Driven from the periodic tick on submitter nodes. Each call either
//! prepares the wallet (denominated coins, collateral coins), joins a
//! relay's queue, or records in `auto_denom_result` why it did nothing.

use darkmix_denom::codec::denominations_by_amounts;
use darkmix_denom::split::split_into_denominations;
use darkmix_denom::{COLLATERAL_OUTPUT, DARKSEND_FEE, DENOMINATIONS, NON_DENOM_BIT, POOL_MAX};
use darkmix_ports::{CoinSource, SelectedCoin};
use darkmix_transport::messages::{DsAccept, TypedMessage};
use darkmix_types::{Amount, RelayNode, CENT, COIN};
use rand::RngCore;

use crate::{MixContext, MixingPool};

/// Relays tried at random before giving up.
const RANDOM_RELAY_ATTEMPTS: usize = 10;

/// Average rounds a liquidity provider needs before it reshuffles.
const LIQUIDITY_MIN_ROUNDS: f64 = 8.0;

/// Upper bound for coin selection over non-denominated funds.
const SELECT_ALL: Amount = 9_999_999 * COIN;

impl MixingPool {
    /// One step of the automatic mixer. Returns true when progress was
    /// made or is pending; the reason for doing nothing is left in
    /// [`MixingPool::auto_denom_result`].
    pub fn do_automatic_denominating(&mut self, ctx: &mut MixContext<'_>, dry_run: bool) -> bool {
        if ctx.chain.is_initial_block_download() || self.is_relay() {
            return false;
        }
        if self.state.is_terminal() {
            return false;
        }

        let height = ctx.chain.best_height();
        if height.saturating_sub(self.cached_last_success) < self.config.min_block_spacing {
            tracing::debug!(height, last = self.cached_last_success, "waiting for spacing");
            self.auto_denom_result = "Last successful mixing action was too recent.".into();
            return false;
        }
        if !self.config.enabled {
            self.auto_denom_result = "Mixing is disabled.".into();
            return false;
        }
        if !dry_run && ctx.wallet.is_locked() {
            self.auto_denom_result = "Wallet is locked.".into();
            return false;
        }
        if !self.my_entries.is_empty() {
            return true;
        }
        if ctx.directory.is_empty() {
            self.auto_denom_result = "No relays detected.".into();
            return false;
        }

        let has_collateral = ctx.wallet.has_collateral_inputs();
        let smallest = DENOMINATIONS[DENOMINATIONS.len() - 1];
        let mut lowest = DARKSEND_FEE + smallest * 5;
        if !has_collateral {
            lowest += COLLATERAL_OUTPUT;
        }

        let anonymized = ctx.wallet.anonymized_balance();
        let need = (self.anonymize_amount * COIN - anonymized)
            .min(POOL_MAX)
            .min(ctx.wallet.balance() - anonymized);
        if need < lowest {
            self.auto_denom_result = "No funds detected in need of denominating.".into();
            return false;
        }

        let rounds = self.config.rounds;
        let Some(selected) = ctx.wallet.select_coins_dark(CENT, need, 0, rounds) else {
            if ctx.wallet.select_coins_dark(CENT, SELECT_ALL, -2, 0).is_some() {
                return dry_run || self.create_denominated(ctx, need);
            }
            self.auto_denom_result = "Can't denominate: no compatible inputs left.".into();
            return false;
        };

        if !has_collateral {
            if !dry_run {
                self.make_collateral_amounts(ctx);
            }
            return true;
        }
        if dry_run {
            return true;
        }

        if self.session_found {
            self.auto_denom_result.clear();
            return true;
        }

        let selected_total: Amount = selected.iter().map(|c| c.value).sum();
        self.session_total_value = selected_total.min(need);

        if ctx.wallet.unconfirmed_denominated_balance() > 0 {
            self.auto_denom_result =
                "Found unconfirmed denominated outputs, will wait till they confirm to continue."
                    .into();
            return false;
        }

        if ctx.rand_below(100) > 33 {
            if let Some(joined) = self.join_queued_relay(ctx, need) {
                return joined;
            }
        }
        self.join_random_relay(ctx, &selected)
    }

    /// Try the live queue announcements. `None` when none fit.
    fn join_queued_relay(&mut self, ctx: &mut MixContext<'_>, need: Amount) -> Option<bool> {
        let rounds = self.config.rounds;
        for dsq in self.queue.live(ctx.now_secs()) {
            if dsq.denom & NON_DENOM_BIT != 0 {
                continue;
            }
            if self.used_relays.contains(&dsq.vin.prevout) {
                continue;
            }
            let Some(relay) = ctx.directory.find(&dsq.vin.prevout) else {
                tracing::debug!(relay = %dsq.vin, "queued relay not in directory");
                continue;
            };
            if relay.protocol_version < self.config.min_protocol {
                continue;
            }
            if ctx
                .wallet
                .select_coins_by_denominations(dsq.denom, CENT, need, 0, rounds)
                .is_none()
            {
                continue;
            }

            tracing::info!(relay = %relay.addr, denom = dsq.denom, "joining queued relay");
            if !self.submit_to(ctx, relay, dsq.denom) {
                self.queue.remove_vin(&dsq.vin);
                continue;
            }
            return Some(true);
        }
        None
    }

    /// Pick relays at random, skipping used and throttled ones.
    fn join_random_relay(&mut self, ctx: &mut MixContext<'_>, selected: &[SelectedCoin]) -> bool {
        let values: Vec<Amount> = selected.iter().map(|c| c.value).collect();
        let denom = denominations_by_amounts(&values);
        let dsq_count = ctx.directory.dsq_count();
        let count_above = ctx.directory.count_above_protocol(self.config.min_protocol);

        for _ in 0..RANDOM_RELAY_ATTEMPTS {
            let Some(relay) = ctx.directory.random(&mut *ctx.rng) else {
                self.auto_denom_result = "No relays detected.".into();
                return false;
            };
            if self.used_relays.contains(&relay.vin.prevout) {
                continue;
            }
            if relay.protocol_version < self.config.min_protocol {
                continue;
            }
            if relay.queued_too_recently(dsq_count, count_above) {
                tracing::debug!(relay = %relay.addr, "relay queued too recently");
                continue;
            }

            self.last_state_change_ms = ctx.now_ms;
            tracing::info!(relay = %relay.addr, denom, "requesting a new session");
            if self.submit_to(ctx, relay, denom) {
                return true;
            }
        }

        self.auto_denom_result = "No compatible relay found.".into();
        false
    }

    /// Send `dsa` to `relay` with our collateral, creating it if needed.
    fn submit_to(&mut self, ctx: &mut MixContext<'_>, relay: RelayNode, denom: u32) -> bool {
        let collateral = match &self.my_collateral {
            Some(tx) => tx.clone(),
            None => match ctx.wallet.create_collateral_transaction() {
                Ok(tx) => {
                    self.my_collateral = Some(tx.clone());
                    tx
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not create collateral");
                    self.auto_denom_result = e.to_string();
                    return false;
                }
            },
        };

        let sent = ctx
            .outbox
            .send_to_addr(relay.addr, TypedMessage::Dsa(DsAccept { denom, collateral }));
        self.used_relays.push(relay.vin.prevout);
        if !sent {
            tracing::warn!(relay = %relay.addr, "relay unreachable");
            self.auto_denom_result = "Error connecting to relay.".into();
            return false;
        }

        self.session_denom = denom;
        self.submitted_to = Some(relay);
        self.auto_denom_result.clear();
        true
    }

    /// Split `total` of non-denominated funds into denominations, plus one
    /// collateral coin if the wallet has none.
    pub fn create_denominated(&mut self, ctx: &mut MixContext<'_>, total: Amount) -> bool {
        let values = match split_into_denominations(total, !ctx.wallet.has_collateral_inputs()) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, total, "cannot split into denominations");
                self.auto_denom_result = e.to_string();
                return false;
            }
        };
        match ctx.wallet.commit_outputs(&values, CoinSource::NonDenominated) {
            Ok(txid) => {
                tracing::info!(txid = %hex::encode(txid), outputs = values.len(), "denominated funds");
                self.cached_last_success = ctx.chain.best_height();
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "denominating failed");
                self.auto_denom_result = e.to_string();
                false
            }
        }
    }

    /// Create one collateral-sized coin, from non-denominated funds if
    /// possible.
    pub fn make_collateral_amounts(&mut self, ctx: &mut MixContext<'_>) -> bool {
        let committed = ctx
            .wallet
            .commit_outputs(&[COLLATERAL_OUTPUT], CoinSource::NonDenominated)
            .or_else(|e| {
                tracing::debug!(error = %e, "no non-denominated funds for collateral");
                ctx.wallet
                    .commit_outputs(&[COLLATERAL_OUTPUT], CoinSource::Denominated)
            });
        match committed {
            Ok(txid) => {
                tracing::info!(txid = %hex::encode(txid), "made collateral coin");
                self.cached_last_success = ctx.chain.best_height();
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not make collateral coin");
                self.auto_denom_result = e.to_string();
                false
            }
        }
    }

    /// Move a random share of the balance to ourselves through
    /// denominated coins, so mixed coins do not sit still.
    pub fn send_random_payment_to_self(&mut self, ctx: &mut MixContext<'_>) -> bool {
        let balance = ctx.wallet.balance();
        if balance <= 0 {
            return false;
        }
        let jitter = (ctx.rng.next_u64() % balance as u64) as Amount;
        let mut payment = balance * 35 / 100 + jitter;
        if payment > balance {
            payment = balance - COIN / 10;
        }
        if payment <= 0 {
            return false;
        }
        match ctx.wallet.commit_outputs(&[payment], CoinSource::Denominated) {
            Ok(txid) => {
                tracing::info!(txid = %hex::encode(txid), payment, "sent random payment to self");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, payment, "random payment to self failed");
                false
            }
        }
    }

    /// The periodic automatic step. A liquidity provider occasionally
    /// reshuffles well-mixed coins and picks a new random target instead.
    pub fn auto_denominate_tick(&mut self, ctx: &mut MixContext<'_>) -> bool {
        let lp = self.config.liquidity_provider;
        if lp != 0 {
            let draw = ctx.rand_below(101 + lp);
            if draw == 50 + lp
                && self.rounds.average_anonymized_rounds(&*ctx.wallet) > LIQUIDITY_MIN_ROUNDS
            {
                self.send_random_payment_to_self(ctx);
                let left = ((ctx.wallet.balance() - ctx.wallet.anonymized_balance()) / COIN - 3)
                    .min(999);
                if left > 0 {
                    self.anonymize_amount = i64::from(ctx.rand_below(left as u32)) + 3;
                    tracing::info!(target = self.anonymize_amount, "new liquidity target");
                }
                return true;
            }
        }
        self.do_automatic_denominating(ctx, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Harness, RELAY_SEED};
    use darkmix_crypto::ed25519::SigningKey;
    use darkmix_denom::codec::{is_collateral_amount, is_denominated_amount};
    use darkmix_ports::Wallet;
    use darkmix_transport::peer::Outbound;
    use darkmix_types::{PoolState, QueueAnnouncement};

    use crate::queue::sign_queue;

    fn funded_client(h: &mut Harness) -> MixingPool {
        h.fund(&[COIN + 1, COIN + 1, COIN + 1, COLLATERAL_OUTPUT], 0);
        h.client_pool()
    }

    #[test]
    fn test_relay_never_mixes() {
        let mut h = Harness::new();
        let mut pool = h.relay_pool(RELAY_SEED);
        h.fund(&[50 * COIN], -2);
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert!(h.outbox.pending().is_empty());
    }

    #[test]
    fn test_initial_download_blocks() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        h.chain.set_initial_download(true);
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
    }

    #[test]
    fn test_disabled_and_locked() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        pool.config.enabled = false;
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(pool.auto_denom_result(), "Mixing is disabled.");

        pool.config.enabled = true;
        h.wallet.set_locked(true);
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(pool.auto_denom_result(), "Wallet is locked.");
        // A dry run ignores the lock.
        assert!(pool.do_automatic_denominating(&mut h.ctx(), true));
    }

    #[test]
    fn test_no_funds() {
        let mut h = Harness::new();
        let mut pool = h.client_pool();
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(
            pool.auto_denom_result(),
            "No funds detected in need of denominating."
        );
    }

    #[test]
    fn test_no_relays() {
        let mut h = Harness::new();
        h.directory = darkmix_ports::memory::MemoryDirectory::new(Vec::new());
        let mut pool = funded_client(&mut h);
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(pool.auto_denom_result(), "No relays detected.");
    }

    #[test]
    fn test_denominates_raw_funds_then_waits() {
        let mut h = Harness::new();
        let mut pool = h.client_pool();
        h.fund(&[50 * COIN], ROUNDS_RAW);
        assert!(pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(pool.cached_last_success(), 1000);
        assert!(h.wallet.coins().iter().any(|c| is_collateral_amount(c.value)));
        assert!(h.wallet.coins().iter().any(|c| is_denominated_amount(c.value)));

        // Same block: spacing not reached.
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(
            pool.auto_denom_result(),
            "Last successful mixing action was too recent."
        );
    }

    const ROUNDS_RAW: i32 = -2;

    #[test]
    fn test_makes_collateral_when_missing() {
        let mut h = Harness::new();
        let mut pool = h.client_pool();
        h.fund(&[COIN + 1, COIN + 1], 0);
        h.fund(&[3 * COIN], ROUNDS_RAW);
        assert!(!h.wallet.has_collateral_inputs());
        assert!(pool.do_automatic_denominating(&mut h.ctx(), false));
        assert!(h.wallet.has_collateral_inputs());
        assert!(h.outbox.pending().is_empty());
    }

    #[test]
    fn test_joins_random_relay() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        assert!(pool.do_automatic_denominating(&mut h.ctx(), false));
        let relay = pool.submitted_to().expect("submitted").clone();
        assert_eq!(pool.used_relays(), &[relay.vin.prevout]);
        assert_eq!(pool.session_denom(), 1 << 2);
        assert!(pool.my_collateral.is_some());
        assert!(pool.auto_denom_result().is_empty());
        let pending = h.outbox.pending();
        assert_eq!(pending.len(), 1);
        assert!(matches!(
            &pending[0],
            Outbound::ToAddr(addr, TypedMessage::Dsa(dsa)) if *addr == relay.addr && dsa.denom == 4
        ));
    }

    #[test]
    fn test_skips_used_relays() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        for node in h.directory.nodes() {
            pool.used_relays.push(node.vin.prevout);
        }
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert_eq!(pool.auto_denom_result(), "No compatible relay found.");
        assert!(h.outbox.pending().is_empty());
    }

    #[test]
    fn test_prefers_queued_relay() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        let seed = 4u8;
        let mut dsq = QueueAnnouncement {
            vin: darkmix_types::TxIn::new(darkmix_types::OutPoint::new([seed; 32], 0)),
            denom: 1 << 2,
            time: h.now_ms / 1000,
            ready: false,
            sig: None,
            relay_sig: None,
            block_height: 0,
            shared_key: None,
        };
        sign_queue(&mut dsq, &SigningKey::from_bytes(&[seed; 32]), 1000);
        pool.queue.push(dsq);

        // Try until the queue branch is drawn; every call either joins the
        // queued relay or a random one.
        let mut joined_queued = false;
        for _ in 0..20 {
            pool.submitted_to = None;
            pool.used_relays.clear();
            pool.do_automatic_denominating(&mut h.ctx(), false);
            if pool.submitted_to().map(|r| r.addr) == Some(crate::testutil::relay_node(seed).0.addr)
            {
                joined_queued = true;
                break;
            }
        }
        assert!(joined_queued);
    }

    #[test]
    fn test_unconfirmed_denominated_waits() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        let pending = h.wallet.fund(&[COIN + 1], 0)[0];
        h.wallet.set_confirmed(&pending, false);
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
        assert!(pool.auto_denom_result().starts_with("Found unconfirmed"));
    }

    #[test]
    fn test_pending_entries_short_circuit() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        let (inputs, amount, outputs) = h.entry_parts(3, 1);
        let collateral = h.collateral(3);
        pool.my_entries
            .push(crate::entry::Entry::new(
                inputs,
                amount,
                collateral,
                outputs,
                h.now_ms / 1000,
            ));
        assert!(pool.do_automatic_denominating(&mut h.ctx(), false));
        assert!(h.outbox.pending().is_empty());
    }

    #[test]
    fn test_terminal_state_blocks() {
        let mut h = Harness::new();
        let mut pool = funded_client(&mut h);
        pool.state = PoolState::Error;
        assert!(!pool.do_automatic_denominating(&mut h.ctx(), false));
    }

    #[test]
    fn test_make_collateral_falls_back_to_denominated() {
        let mut h = Harness::new();
        let mut pool = h.client_pool();
        h.fund(&[COIN + 1], 0);
        assert!(pool.make_collateral_amounts(&mut h.ctx()));
        assert!(h.wallet.has_collateral_inputs());
    }

    #[test]
    fn test_random_payment_needs_balance() {
        let mut h = Harness::new();
        let mut pool = h.client_pool();
        assert!(!pool.send_random_payment_to_self(&mut h.ctx()));
    }
}

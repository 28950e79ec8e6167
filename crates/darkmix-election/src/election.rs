//! Winner production, gossip handling and sync.

use std::collections::HashMap;

use darkmix_crypto::ed25519::{SigningKey, VerifyingKey};
use darkmix_crypto::signer::{sign_message, verify_message};
use darkmix_ports::{ChainView, RelayDirectory};
use darkmix_transport::messages::TypedMessage;
use darkmix_transport::peer::{Outbox, PeerId, PeerInfo};
use darkmix_types::{Hash, OutPoint, PaymentWinner, RelayNode, Script, TxIn};

use crate::score::{calculate_score, vote_hash, SCORE_BLOCK_OFFSET};
use crate::winners::{retention, WinnerTable, SYNC_AHEAD, SYNC_BEHIND};
use crate::{ElectionError, Result};

/// Seconds of uptime a winner needs per enabled relay.
const UPTIME_PER_RELAY_SECS: i64 = 150;

/// Collaborators for one election step.
pub struct ElectionContext<'a> {
    pub chain: &'a dyn ChainView,
    pub directory: &'a dyn RelayDirectory,
    pub outbox: &'a mut dyn Outbox,
}

/// The payment election of one node.
#[derive(Debug)]
pub struct PaymentElection {
    authority: VerifyingKey,
    signing_key: Option<SigningKey>,
    winners: WinnerTable,
    seen_votes: HashMap<Hash, PaymentWinner>,
}

impl PaymentElection {
    pub fn new(authority: VerifyingKey) -> Self {
        Self {
            authority,
            signing_key: None,
            winners: WinnerTable::default(),
            seen_votes: HashMap::new(),
        }
    }

    /// Whether this node produces winners.
    pub fn is_enabled(&self) -> bool {
        self.signing_key.is_some()
    }

    pub fn winners(&self) -> &WinnerTable {
        &self.winners
    }

    /// Load the authority signing key. A test signature made with it must
    /// verify against the authority key, otherwise the key is refused.
    pub fn set_private_key(&mut self, key: SigningKey) -> Result<()> {
        let mut sample = PaymentWinner {
            block_height: 0,
            vin: TxIn::new(OutPoint::null()),
            payee: Script::default(),
            score: 0,
            sig: None,
        };
        sample.sig = Some(sign_message(&key, &sample.signing_message()));
        if !self.check_signature(&sample) {
            tracing::warn!("election key does not match the authority");
            return Err(ElectionError::KeyMismatch);
        }
        self.signing_key = Some(key);
        tracing::info!("initialized as payment election authority");
        Ok(())
    }

    pub fn check_signature(&self, winner: &PaymentWinner) -> bool {
        winner.sig.as_ref().is_some_and(|sig| {
            verify_message(&self.authority, sig, &winner.signing_message()).is_ok()
        })
    }

    fn sign(&self, winner: &mut PaymentWinner) -> Result<()> {
        let key = self.signing_key.as_ref().ok_or(ElectionError::NoSigningKey)?;
        winner.sig = Some(sign_message(key, &winner.signing_message()));
        Ok(())
    }

    /// Store a winner with the score it carries.
    pub fn record(&mut self, winner: PaymentWinner) -> bool {
        let hash = vote_hash(&winner);
        if !self.winners.add(winner.clone()) {
            return false;
        }
        self.seen_votes.insert(hash, winner);
        true
    }

    /// Score `winner` from chain data and store it if it beats the
    /// current record for its height.
    pub fn add_winning_node(&mut self, chain: &dyn ChainView, mut winner: PaymentWinner) -> Result<bool> {
        let seed_height = winner
            .block_height
            .checked_sub(SCORE_BLOCK_OFFSET)
            .ok_or(ElectionError::UnknownBlock(0))?;
        let block = chain
            .block_hash(seed_height)
            .ok_or(ElectionError::UnknownBlock(seed_height))?;
        winner.score = calculate_score(&block, &winner.vin);
        Ok(self.record(winner))
    }

    /// Elect, sign and announce the winner for `height`. Does nothing
    /// unless the authority key is loaded.
    pub fn process_block(&mut self, ctx: &mut ElectionContext<'_>, height: u64) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(node) = self.elect(ctx.directory) else {
            tracing::debug!(height, "no relay eligible for payment");
            return Ok(false);
        };

        let mut winner = PaymentWinner {
            block_height: height,
            vin: node.vin.clone(),
            payee: node.payee(),
            score: 0,
            sig: None,
        };
        self.sign(&mut winner)?;
        if !self.add_winning_node(ctx.chain, winner)? {
            return Ok(false);
        }
        if let Some(stored) = self.winners.get(height) {
            tracing::info!(height, relay = %stored.vin, "elected payment winner");
            ctx.outbox.broadcast(TypedMessage::Mnw(stored.clone()));
        }
        Ok(true)
    }

    /// Oldest relay outside the latest payment cycle with enough input age
    /// and uptime, else the longest-unpaid enabled relay of that cycle.
    fn elect(&self, directory: &dyn RelayDirectory) -> Option<RelayNode> {
        let enabled = directory.count_enabled();
        let cycle = self.winners.recent_cycle();

        let oldest = directory.oldest_not_in(&cycle).filter(|n| {
            n.input_age as usize > enabled
                && n.last_seen - n.sig_time > enabled as i64 * UPTIME_PER_RELAY_SECS
        });
        if oldest.is_some() || enabled == 0 {
            return oldest;
        }
        cycle
            .iter()
            .rev()
            .filter_map(|vin| directory.find(vin))
            .find(RelayNode::is_enabled)
    }

    /// Handle `mnget` and `mnw`. Other messages are ignored.
    pub fn process_message(
        &mut self,
        ctx: &mut ElectionContext<'_>,
        peer: &PeerInfo,
        msg: &TypedMessage,
    ) -> Result<()> {
        if ctx.chain.is_initial_block_download() {
            return Ok(());
        }
        let result = match msg {
            TypedMessage::MnGet(_) => {
                let sent = self.sync(ctx, peer.id);
                tracing::debug!(peer = %peer.addr, sent, "sent payment winners");
                Ok(())
            }
            TypedMessage::Mnw(winner) => self.handle_winner(ctx, winner.clone()),
            _ => Ok(()),
        };
        if let Err(e) = &result {
            if let Some(score) = e.penalty() {
                ctx.outbox.misbehaving(peer.id, score);
            }
            tracing::warn!(peer = %peer.addr, error = %e, "rejected winner");
        }
        result
    }

    fn handle_winner(&mut self, ctx: &mut ElectionContext<'_>, winner: PaymentWinner) -> Result<()> {
        let hash = vote_hash(&winner);
        if self.seen_votes.contains_key(&hash) {
            tracing::trace!(height = winner.block_height, "seen vote");
            return Ok(());
        }

        let best = ctx.chain.best_height();
        if winner.block_height.saturating_add(SYNC_BEHIND) < best
            || winner.block_height > best.saturating_add(SYNC_AHEAD)
        {
            tracing::debug!(height = winner.block_height, best, "winner out of range");
            return Ok(());
        }
        if winner.vin.sequence != u32::MAX {
            return Err(ElectionError::InvalidSequence(winner.vin.sequence));
        }
        if !self.check_signature(&winner) {
            return Err(ElectionError::InvalidSignature(winner.block_height));
        }

        self.seen_votes.insert(hash, winner.clone());
        match self.add_winning_node(ctx.chain, winner.clone()) {
            Ok(true) => tracing::info!(height = winner.block_height, relay = %winner.vin, "winner accepted"),
            Ok(false) => tracing::debug!(height = winner.block_height, "winner does not beat stored score"),
            Err(e) => tracing::debug!(error = %e, "winner not scored"),
        }
        ctx.outbox.broadcast(TypedMessage::Mnw(winner));
        Ok(())
    }

    /// Send the winners around the best height to `peer`.
    pub fn sync(&self, ctx: &mut ElectionContext<'_>, peer: PeerId) -> usize {
        let mut sent = 0;
        for winner in self.winners.sync_window(ctx.chain.best_height()) {
            ctx.outbox.send(peer, TypedMessage::Mnw(winner.clone()));
            sent += 1;
        }
        sent
    }

    /// Drop records and seen votes older than the retention window.
    pub fn clean_payment_list(&mut self, best: u64, relay_count: usize) {
        let removed = self.winners.prune(best, relay_count);
        let limit = retention(relay_count);
        let seen_before = self.seen_votes.len();
        self.seen_votes
            .retain(|_, w| best.saturating_sub(w.block_height) <= limit);
        let forgotten = seen_before - self.seen_votes.len();
        if removed > 0 || forgotten > 0 {
            tracing::debug!(removed, forgotten, best, "pruned payment winners");
        }
    }

    /// Number of vote hashes remembered for duplicate suppression.
    pub fn seen_count(&self) -> usize {
        self.seen_votes.len()
    }

    pub fn block_payee(&self, height: u64) -> Option<&Script> {
        self.winners.payee(height)
    }

    pub fn winning_node(&self, height: u64) -> Option<&TxIn> {
        self.winners.winning_vin(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_ports::memory::{MemoryChain, MemoryDirectory};
    use darkmix_transport::peer::{Outbound, QueuedOutbox};
    use darkmix_types::RelayNodeState;

    const AUTHORITY: [u8; 32] = [0xA5; 32];

    fn node(seed: u8, sig_time: i64, last_seen: i64) -> RelayNode {
        let key = SigningKey::from_bytes(&[seed; 32]).verifying_key();
        RelayNode {
            vin: TxIn::new(OutPoint::new([seed; 32], 0)),
            addr: format!("10.0.0.{seed}:9999").parse().expect("addr"),
            collateral_key: key,
            node_key: key,
            sig_time,
            last_seen,
            protocol_version: 70054,
            last_dsq: 0,
            input_age: 1000,
            state: RelayNodeState::Enabled,
        }
    }

    fn mature_directory() -> MemoryDirectory {
        MemoryDirectory::new((1..=5).map(|s| node(s, i64::from(s), 10_000)).collect())
    }

    fn authority() -> PaymentElection {
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        election
            .set_private_key(SigningKey::from_bytes(&AUTHORITY))
            .expect("authority key");
        election
    }

    fn signed_winner(height: u64, seed: u8) -> PaymentWinner {
        let mut winner = PaymentWinner {
            block_height: height,
            vin: TxIn::new(OutPoint::new([seed; 32], 0)),
            payee: node(seed, 0, 0).payee(),
            score: 0,
            sig: None,
        };
        winner.sig = Some(sign_message(
            &SigningKey::from_bytes(&AUTHORITY),
            &winner.signing_message(),
        ));
        winner
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            id: PeerId(5),
            addr: "192.168.1.5:9999".parse().expect("addr"),
            version: 70054,
        }
    }

    #[test]
    fn test_wrong_key_refused() {
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let result = election.set_private_key(SigningKey::from_bytes(&[1; 32]));
        assert!(matches!(result, Err(ElectionError::KeyMismatch)));
        assert!(!election.is_enabled());
    }

    #[test]
    fn test_disabled_produces_nothing() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        assert!(!election.process_block(&mut ctx, 1000).expect("no error"));
        assert!(election.winners().is_empty());
    }

    #[test]
    fn test_oldest_unpaid_relay_wins() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election = authority();
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        assert!(election.process_block(&mut ctx, 1000).expect("elected"));
        assert!(election.process_block(&mut ctx, 1001).expect("elected"));
        assert_eq!(election.winning_node(1000).map(|v| v.prevout.hash[0]), Some(1));
        assert_eq!(election.winning_node(1001).map(|v| v.prevout.hash[0]), Some(2));
        assert_eq!(election.block_payee(1000), Some(&node(1, 0, 0).payee()));
        assert!(election
            .winners()
            .get(1000)
            .is_some_and(|w| election.check_signature(w)));
        assert_eq!(outbox.messages_named("mnw").len(), 2);
    }

    #[test]
    fn test_young_relays_fall_back_to_cycle() {
        let chain = MemoryChain::new(1000);
        let directory =
            MemoryDirectory::new((1..=5).map(|s| node(s, 9_990, 10_000)).collect());
        let mut outbox = QueuedOutbox::new();
        let mut election = authority();
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        assert!(!election.process_block(&mut ctx, 1000).expect("nobody"));

        election.record(signed_winner(990, 3));
        assert!(election.process_block(&mut ctx, 1000).expect("fallback"));
        assert_eq!(election.winning_node(1000).map(|v| v.prevout.hash[0]), Some(3));
    }

    #[test]
    fn test_gossiped_winner_accepted_once() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        let msg = TypedMessage::Mnw(signed_winner(1005, 2));
        election
            .process_message(&mut ctx, &peer(), &msg)
            .expect("accepted");
        election
            .process_message(&mut ctx, &peer(), &msg)
            .expect("seen");
        assert_eq!(election.winning_node(1005).map(|v| v.prevout.hash[0]), Some(2));
        assert_eq!(outbox.messages_named("mnw").len(), 1);
    }

    #[test]
    fn test_bad_winner_penalized() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };

        let mut bad_seq = signed_winner(1001, 2);
        bad_seq.vin.sequence = 0;
        let result = election.process_message(&mut ctx, &peer(), &TypedMessage::Mnw(bad_seq));
        assert!(matches!(result, Err(ElectionError::InvalidSequence(0))));

        let mut forged = signed_winner(1002, 2);
        forged.payee = Script::p2pkh(&[0xEE; 20]);
        let result = election.process_message(&mut ctx, &peer(), &TypedMessage::Mnw(forged));
        assert!(matches!(result, Err(ElectionError::InvalidSignature(1002))));

        assert_eq!(outbox.penalty_for(PeerId(5)), 200);
        assert!(election.winners().is_empty());
    }

    #[test]
    fn test_out_of_range_ignored() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        for height in [989, 1021] {
            let msg = TypedMessage::Mnw(signed_winner(height, 2));
            election
                .process_message(&mut ctx, &peer(), &msg)
                .expect("ignored");
        }
        assert!(election.winners().is_empty());
        assert!(outbox.pending().is_empty());
    }

    #[test]
    fn test_sync_replays_window() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election = authority();
        for height in [900, 995, 1000, 1015] {
            election.record(signed_winner(height, 1));
        }
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        let msg = TypedMessage::MnGet(darkmix_transport::messages::MnGet {});
        election
            .process_message(&mut ctx, &peer(), &msg)
            .expect("synced");
        let sent = outbox
            .pending()
            .iter()
            .filter(|o| matches!(o, Outbound::ToPeer(PeerId(5), TypedMessage::Mnw(_))))
            .count();
        assert_eq!(sent, 3);
    }

    #[test]
    fn test_ignored_during_initial_download() {
        let mut chain = MemoryChain::new(1000);
        chain.set_initial_download(true);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        let msg = TypedMessage::Mnw(signed_winner(1000, 2));
        election
            .process_message(&mut ctx, &peer(), &msg)
            .expect("ignored");
        assert!(election.winners().is_empty());
    }

    #[test]
    fn test_clean_payment_list() {
        let mut election = authority();
        election.record(signed_winner(10, 1));
        election.record(signed_winner(2000, 2));
        election.clean_payment_list(2000, 5);
        assert_eq!(election.winners().len(), 1);
        assert!(election.winning_node(10).is_none());
    }

    #[test]
    fn test_clean_payment_list_forgets_old_votes() {
        let mut election = authority();
        for height in [10, 20, 1500, 2000] {
            election.record(signed_winner(height, 1));
        }
        assert_eq!(election.seen_count(), 4);
        election.clean_payment_list(2000, 5);
        assert_eq!(election.seen_count(), 2);

        // A relay count above the floor widens the window.
        let mut election = authority();
        election.record(signed_winner(500, 1));
        election.clean_payment_list(3500, 1500);
        assert_eq!(election.seen_count(), 1);
        election.clean_payment_list(3501, 1500);
        assert_eq!(election.seen_count(), 0);
    }

    #[test]
    fn test_winner_near_height_limit_ignored() {
        let chain = MemoryChain::new(1000);
        let directory = mature_directory();
        let mut outbox = QueuedOutbox::new();
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        let mut ctx = ElectionContext {
            chain: &chain,
            directory: &directory,
            outbox: &mut outbox,
        };
        for height in [u64::MAX - 1, u64::MAX] {
            let msg = TypedMessage::Mnw(signed_winner(height, 2));
            election
                .process_message(&mut ctx, &peer(), &msg)
                .expect("ignored");
        }
        assert!(election.winners().is_empty());
        assert!(outbox.pending().is_empty());
    }
}

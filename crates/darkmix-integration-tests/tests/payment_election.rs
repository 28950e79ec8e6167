//! Integration test: payment winner election and gossip.
//!
//! 1. Claims for one height only ever move to a larger score
//! 2. The authority elects the longest-unpaid relay and gossips it
//! 3. A follower scores the claim itself, stores it and passes it on once
//! 4. Tampered claims cost the sender
//! 5. A late joiner syncs the recent winners

use darkmix_crypto::ed25519::SigningKey;
use darkmix_election::{ElectionContext, ElectionError, PaymentElection, PENALTY_BAD_WINNER};
use darkmix_integration_tests::{relay_node, START_HEIGHT};
use darkmix_ports::memory::{MemoryChain, MemoryDirectory};
use darkmix_transport::messages::{MnGet, TypedMessage};
use darkmix_transport::peer::{Outbound, PeerId, PeerInfo, QueuedOutbox};
use darkmix_types::PaymentWinner;

const AUTHORITY: [u8; 32] = [0xA5; 32];

struct ElectionNode {
    election: PaymentElection,
    chain: MemoryChain,
    directory: MemoryDirectory,
    outbox: QueuedOutbox,
}

impl ElectionNode {
    fn new(authority: bool) -> Self {
        let mut election =
            PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());
        if authority {
            election
                .set_private_key(SigningKey::from_bytes(&AUTHORITY))
                .expect("authority key");
        }
        Self {
            election,
            chain: MemoryChain::new(START_HEIGHT),
            directory: MemoryDirectory::new((1..=5).map(|s| relay_node(s).0).collect()),
            outbox: QueuedOutbox::new(),
        }
    }

    fn receive(&mut self, peer: &PeerInfo, msg: &TypedMessage) -> darkmix_election::Result<()> {
        let mut ctx = ElectionContext {
            chain: &self.chain,
            directory: &self.directory,
            outbox: &mut self.outbox,
        };
        self.election.process_message(&mut ctx, peer, msg)
    }

    fn new_block(&mut self, height: u64) -> bool {
        let mut ctx = ElectionContext {
            chain: &self.chain,
            directory: &self.directory,
            outbox: &mut self.outbox,
        };
        self.election.process_block(&mut ctx, height).expect("block processed")
    }
}

fn peer(n: u8) -> PeerInfo {
    PeerInfo {
        id: PeerId(u64::from(n)),
        addr: format!("192.168.1.{n}:9999").parse().expect("addr"),
        version: 70054,
    }
}

fn claim(seed: u8, score: u64) -> PaymentWinner {
    let relay = relay_node(seed).0;
    PaymentWinner {
        block_height: START_HEIGHT,
        payee: relay.payee(),
        vin: relay.vin,
        score,
        sig: None,
    }
}

#[tokio::test]
async fn higher_score_replaces_stored_claim() {
    let mut election =
        PaymentElection::new(SigningKey::from_bytes(&AUTHORITY).verifying_key());

    assert!(election.record(claim(1, 100)));
    assert!(!election.record(claim(2, 50)));
    let stored = election.winners().get(START_HEIGHT).expect("stored");
    assert_eq!(stored.score, 100);
    assert_eq!(stored.vin, relay_node(1).0.vin);

    assert!(election.record(claim(3, 150)));
    let stored = election.winners().get(START_HEIGHT).expect("stored");
    assert_eq!(stored.score, 150);
    assert_eq!(election.winning_node(START_HEIGHT), Some(&relay_node(3).0.vin));
    assert_eq!(election.winners().len(), 1);
}

#[tokio::test]
async fn elected_winner_gossips_once() {
    let mut authority = ElectionNode::new(true);
    let mut follower = ElectionNode::new(false);

    assert!(authority.new_block(START_HEIGHT));
    let announced = authority.outbox.messages_named("mnw");
    assert_eq!(announced.len(), 1);
    let msg = announced[0].clone();
    let winner = authority
        .election
        .winners()
        .get(START_HEIGHT)
        .expect("elected")
        .clone();
    // Relay 1 has the oldest announcement.
    assert_eq!(winner.vin, relay_node(1).0.vin);

    follower.receive(&peer(1), &msg).expect("accepted");
    assert_eq!(follower.election.winning_node(START_HEIGHT), Some(&winner.vin));
    assert_eq!(
        follower.election.block_payee(START_HEIGHT),
        Some(&relay_node(1).0.payee())
    );
    assert_eq!(
        follower.election.winners().get(START_HEIGHT).map(|w| w.score),
        Some(winner.score)
    );
    assert_eq!(follower.outbox.messages_named("mnw").len(), 1);

    follower.receive(&peer(2), &msg).expect("seen");
    assert_eq!(follower.outbox.messages_named("mnw").len(), 1);
}

#[tokio::test]
async fn tampered_claim_costs_sender() {
    let mut authority = ElectionNode::new(true);
    let mut follower = ElectionNode::new(false);
    assert!(authority.new_block(START_HEIGHT));
    let mut winner = authority
        .election
        .winners()
        .get(START_HEIGHT)
        .expect("elected")
        .clone();
    winner.payee = relay_node(4).0.payee();

    let sender = peer(3);
    let result = follower.receive(&sender, &TypedMessage::Mnw(winner));
    assert!(matches!(result, Err(ElectionError::InvalidSignature(h)) if h == START_HEIGHT));
    assert_eq!(follower.outbox.penalty_for(sender.id), PENALTY_BAD_WINNER);
    assert!(follower.election.winners().is_empty());
}

#[tokio::test]
async fn late_joiner_syncs_winners() {
    let mut authority = ElectionNode::new(true);
    for height in START_HEIGHT - 2..=START_HEIGHT {
        assert!(authority.new_block(height));
    }
    authority.outbox.drain();

    let joiner = peer(7);
    authority
        .receive(&joiner, &TypedMessage::MnGet(MnGet {}))
        .expect("sync");
    let sent = authority
        .outbox
        .pending()
        .iter()
        .filter(|o| matches!(o, Outbound::ToPeer(id, TypedMessage::Mnw(_)) if *id == joiner.id))
        .count();
    assert_eq!(sent, 3);
}

//! Integration test: envelopes through a forwarding relay.
//!
//! 1. Relay 1 fills its queue and hands out the round's shared key
//! 2. A submitter sends an envelope to relay 2
//! 3. Relay 2 checks relay 1's freshness proof and passes the item on
//! 4. Relay 1 checks the shared-key MAC and takes the item
//! 5. Envelopes with a forged freshness proof stop at the forwarder

use darkmix_crypto::ed25519::SigningKey;
use darkmix_crypto::signer::{sign_message, SharedKey};
use darkmix_integration_tests::{relay_node, Network, START_HEIGHT};
use darkmix_pool::queue::height_message;
use darkmix_pool::{PoolError, PENALTY_BAD_RELAY_SIG};
use darkmix_transport::messages::{DsAccept, TypedMessage};
use darkmix_types::{OutPoint, PoolState, RelayEnvelope, RelayItem, TxIn};

const SESSION_RELAY: usize = 0;
const FORWARDER: usize = 1;

/// Two relays and three clients; the first relay's round is ready.
fn ready_round() -> (Network, SharedKey) {
    let mut net = Network::new(&[1, 2], 3);
    let clients: Vec<usize> = net.client_indices().collect();
    for (n, &c) in clients.iter().enumerate() {
        let collateral = net.collateral(30 + n as u8);
        net.inject(c, SESSION_RELAY, TypedMessage::Dsa(DsAccept { denom: 4, collateral }))
            .expect("dsa accepted");
    }
    assert_eq!(net.nodes[SESSION_RELAY].pool.state(), PoolState::AcceptingEntries);

    let key = net.nodes[SESSION_RELAY]
        .outbox
        .pending()
        .iter()
        .find_map(|o| match o {
            darkmix_transport::peer::Outbound::Broadcast(TypedMessage::Dsq(q)) if q.ready => {
                q.shared_key.clone()
            }
            _ => None,
        })
        .expect("ready announcement carries the shared key");
    net.run();
    (net, key)
}

fn envelope(signer: &SigningKey, key: &SharedKey, item: RelayItem) -> RelayEnvelope {
    RelayEnvelope {
        target: relay_node(1).0.vin,
        relay_sig: sign_message(signer, &height_message(START_HEIGHT)),
        block_height: START_HEIGHT,
        shared_sig: key.sign(&item.mac_material()),
        item,
    }
}

#[tokio::test]
async fn envelope_reaches_session_relay_through_forwarder() {
    let (mut net, key) = ready_round();
    let client = net.client_indices().start;
    let before = net.nodes[SESSION_RELAY].pool.anon().count();

    let item = RelayItem::In(TxIn::new(OutPoint::new([0x77; 32], 0)));
    let env = envelope(&relay_node(1).1, &key, item);
    net.inject(client, FORWARDER, TypedMessage::Dsr(env))
        .expect("forwarded");
    assert_eq!(net.nodes[FORWARDER].outbox.messages_named("dsai").len(), 1);

    net.run();
    assert_eq!(net.nodes[SESSION_RELAY].pool.anon().count(), before + 1);
    assert!(net.rejections.iter().all(|r| r.command != "dsai"));
}

#[tokio::test]
async fn forged_freshness_proof_stops_at_forwarder() {
    let (mut net, key) = ready_round();
    let client = net.client_indices().start;

    let item = RelayItem::In(TxIn::new(OutPoint::new([0x78; 32], 0)));
    let env = envelope(&SigningKey::from_bytes(&[9; 32]), &key, item);
    let result = net.inject(client, FORWARDER, TypedMessage::Dsr(env));
    assert!(matches!(result, Err(PoolError::Misbehavior { .. })));
    assert!(net.nodes[FORWARDER].outbox.messages_named("dsai").is_empty());

    net.run();
    let client_id = net.nodes[client].info.id;
    assert!(net
        .penalties
        .iter()
        .any(|&(from, peer, score)| from == FORWARDER
            && peer == client_id
            && score == PENALTY_BAD_RELAY_SIG));
    assert_eq!(net.nodes[SESSION_RELAY].pool.anon().count(), 0);
}

#[tokio::test]
async fn wrong_shared_key_is_refused_by_session_relay() {
    let (mut net, _) = ready_round();
    let client = net.client_indices().start;

    let other = SharedKey::from_bytes([0x42; 32]);
    let item = RelayItem::In(TxIn::new(OutPoint::new([0x79; 32], 0)));
    let env = envelope(&relay_node(1).1, &other, item);
    net.inject(client, FORWARDER, TypedMessage::Dsr(env))
        .expect("the forwarder cannot check the MAC");
    net.run();

    assert!(net
        .rejections
        .iter()
        .any(|r| r.node == SESSION_RELAY && r.command == "dsai"));
    assert_eq!(net.nodes[SESSION_RELAY].pool.anon().count(), 0);
}

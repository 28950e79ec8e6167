//! Integration test crate for darkmix.
//!
//! The library part is a small in-process network. Every node owns a
//! mixing pool and in-memory collaborators; [`Network::run`] delivers the
//! queued outbound intents, first in first out, until nothing is left.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p darkmix-integration-tests
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;

use darkmix_crypto::ed25519::SigningKey;
use darkmix_denom::{COLLATERAL_OUTPUT, DARKSEND_COLLATERAL};
use darkmix_pool::{MixContext, MixingPool, PoolConfig, RelayIdentity, Role};
use darkmix_ports::memory::{signature_for, MemoryChain, MemoryDirectory, MemoryWallet};
use darkmix_transport::messages::{DsEntry, TypedMessage};
use darkmix_transport::peer::{Outbound, PeerId, PeerInfo, QueuedOutbox};
use darkmix_types::{
    Amount, OutPoint, RelayNode, RelayNodeState, Script, Transaction, TxIn, TxOut, COIN,
};
use rand::{rngs::StdRng, SeedableRng};

/// Simulated wall clock at network creation.
pub const START_MS: i64 = 1_700_000_000_000;

/// Chain height every node starts at.
pub const START_HEIGHT: u64 = 1000;

pub const PROTOCOL_VERSION: u32 = 70054;

/// Upper bound on deliveries in one [`Network::run`].
pub const MAX_DELIVERIES: usize = 10_000;

/// Directory entry and node key of the relay with `seed`.
pub fn relay_node(seed: u8) -> (RelayNode, SigningKey) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let node = RelayNode {
        vin: TxIn::new(OutPoint::new([seed; 32], 0)),
        addr: SocketAddr::from(([10, 0, 0, seed], 9999)),
        collateral_key: key.verifying_key(),
        node_key: key.verifying_key(),
        sig_time: 1_000 + i64::from(seed),
        last_seen: 10_000,
        protocol_version: PROTOCOL_VERSION,
        last_dsq: 0,
        input_age: 1000,
        state: RelayNodeState::Enabled,
    };
    (node, key)
}

/// One simulated node.
pub struct TestNode {
    pub info: PeerInfo,
    pub pool: MixingPool,
    pub chain: MemoryChain,
    pub directory: MemoryDirectory,
    pub wallet: MemoryWallet,
    pub outbox: QueuedOutbox,
    pub rng: StdRng,
}

impl TestNode {
    /// The pool and a context over the node's collaborators.
    pub fn split(&mut self, now_ms: i64) -> (&mut MixingPool, MixContext<'_>) {
        let ctx = MixContext {
            now_ms,
            chain: &mut self.chain,
            directory: &mut self.directory,
            wallet: &mut self.wallet,
            outbox: &mut self.outbox,
            rng: &mut self.rng,
        };
        (&mut self.pool, ctx)
    }
}

/// A message a node refused.
#[derive(Clone, Debug)]
pub struct Rejection {
    pub node: usize,
    pub command: &'static str,
    pub error: String,
}

/// Relays first, then clients. Every node shares the same directory.
pub struct Network {
    pub nodes: Vec<TestNode>,
    pub now_ms: i64,
    relays: usize,
    pub rejections: Vec<Rejection>,
    /// `(sender, peer, score)` for every misbehaviour report.
    pub penalties: Vec<(usize, PeerId, u32)>,
    /// `(sender, command)` for every broadcast.
    pub broadcasts: Vec<(usize, &'static str)>,
}

impl Network {
    pub fn new(relay_seeds: &[u8], clients: usize) -> Self {
        let directory: Vec<RelayNode> = relay_seeds.iter().map(|&s| relay_node(s).0).collect();
        let mut nodes = Vec::with_capacity(relay_seeds.len() + clients);

        for (idx, &seed) in relay_seeds.iter().enumerate() {
            let (relay, key) = relay_node(seed);
            let role = Role::Relay(RelayIdentity {
                vin: relay.vin.clone(),
                node_key: Some(key),
            });
            nodes.push(Self::node(idx, relay.addr, role, &directory));
        }
        for n in 0..clients {
            let idx = relay_seeds.len() + n;
            let addr = SocketAddr::from(([192, 168, 1, (n + 1) as u8], 9999));
            nodes.push(Self::node(idx, addr, Role::Client, &directory));
        }

        Self {
            nodes,
            now_ms: START_MS,
            relays: relay_seeds.len(),
            rejections: Vec::new(),
            penalties: Vec::new(),
            broadcasts: Vec::new(),
        }
    }

    fn node(idx: usize, addr: SocketAddr, role: Role, directory: &[RelayNode]) -> TestNode {
        let mut rng = StdRng::seed_from_u64(idx as u64 + 7);
        let pool = MixingPool::new(PoolConfig::default(), role, &mut rng);
        TestNode {
            info: PeerInfo {
                id: PeerId(idx as u64 + 1),
                addr,
                version: PROTOCOL_VERSION,
            },
            pool,
            chain: MemoryChain::new(START_HEIGHT),
            directory: MemoryDirectory::new(directory.to_vec()),
            wallet: MemoryWallet::new([0x10u8.wrapping_add(idx as u8); 32]),
            outbox: QueuedOutbox::new(),
            rng,
        }
    }

    pub fn relay_indices(&self) -> std::ops::Range<usize> {
        0..self.relays
    }

    pub fn client_indices(&self) -> std::ops::Range<usize> {
        self.relays..self.nodes.len()
    }

    pub fn advance(&mut self, ms: i64) {
        self.now_ms += ms;
    }

    /// Make every chain know an unspent output.
    pub fn known_output(&mut self, outpoint: OutPoint, value: Amount) {
        for node in &mut self.nodes {
            node.chain.add_output(outpoint, value);
        }
    }

    /// Fund a node's wallet with coins every chain knows about.
    pub fn fund(&mut self, node: usize, values: &[Amount]) -> Vec<OutPoint> {
        let outpoints = self.nodes[node].wallet.fund(values, 0);
        for (outpoint, value) in outpoints.iter().zip(values) {
            self.known_output(*outpoint, *value);
        }
        outpoints
    }

    /// One denominated coin and one collateral-sized coin.
    pub fn fund_for_mixing(&mut self, node: usize) -> Vec<OutPoint> {
        self.fund(node, &[COIN + 1, COLLATERAL_OUTPUT])
    }

    /// A signed collateral over an output every node knows.
    pub fn collateral(&mut self, seed: u8) -> Transaction {
        let prevout = OutPoint::new([0x40u8.wrapping_add(seed); 32], 1);
        self.known_output(prevout, COLLATERAL_OUTPUT);
        let mut input = TxIn::new(prevout);
        input.script_sig = signature_for(&prevout);
        Transaction::new(
            vec![input],
            vec![TxOut::new(
                COLLATERAL_OUTPUT - DARKSEND_COLLATERAL,
                Script::p2pkh(&[seed; 20]),
            )],
        )
    }

    /// A one-coin direct entry over an output every node knows.
    pub fn entry(&mut self, seed: u8) -> DsEntry {
        let prevout = OutPoint::new([0x80u8.wrapping_add(seed); 32], 0);
        self.known_output(prevout, COIN + 1);
        DsEntry {
            inputs: vec![TxIn::new(prevout)],
            amount: COIN + 1,
            collateral: self.collateral(seed),
            outputs: vec![TxOut::new(COIN + 1, Script::p2pkh(&[seed; 20]))],
        }
    }

    /// Run `f` against a node's pool.
    pub fn with_pool<R>(
        &mut self,
        node: usize,
        f: impl FnOnce(&mut MixingPool, &mut MixContext<'_>) -> R,
    ) -> R {
        let now = self.now_ms;
        let (pool, mut ctx) = self.nodes[node].split(now);
        f(pool, &mut ctx)
    }

    /// Hand `msg` from `from` to `to` right away. Whatever `to` sends in
    /// response stays queued for the next [`Network::run`].
    pub fn inject(&mut self, from: usize, to: usize, msg: TypedMessage) -> darkmix_pool::Result<()> {
        let sender = self.nodes[from].info.clone();
        let command = msg.command();
        let result = self.with_pool(to, |pool, ctx| pool.process_message(ctx, &sender, msg));
        if let Err(e) = &result {
            self.rejections.push(Rejection {
                node: to,
                command,
                error: e.to_string(),
            });
        }
        result
    }

    /// Deliver queued intents until the network is quiet. Returns the
    /// number of deliveries.
    pub fn run(&mut self) -> usize {
        let mut queue: VecDeque<(usize, Outbound)> = VecDeque::new();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            queue.extend(node.outbox.drain().into_iter().map(|o| (idx, o)));
        }

        let mut delivered = 0;
        while let Some((from, out)) = queue.pop_front() {
            for (to, msg) in self.route(from, out) {
                if delivered >= MAX_DELIVERIES {
                    return delivered;
                }
                delivered += 1;
                let _ = self.inject(from, to, msg);
                queue.extend(self.nodes[to].outbox.drain().into_iter().map(|o| (to, o)));
            }
        }
        delivered
    }

    fn route(&mut self, from: usize, out: Outbound) -> Vec<(usize, TypedMessage)> {
        match out {
            Outbound::ToPeer(id, msg) => self
                .nodes
                .iter()
                .position(|n| n.info.id == id)
                .map(|to| vec![(to, msg)])
                .unwrap_or_default(),
            Outbound::ToAddr(addr, msg) => self
                .nodes
                .iter()
                .position(|n| n.info.addr == addr)
                .map(|to| vec![(to, msg)])
                .unwrap_or_default(),
            Outbound::Broadcast(msg) => {
                self.broadcasts.push((from, msg.command()));
                (0..self.nodes.len())
                    .filter(|&to| to != from)
                    .map(|to| (to, msg.clone()))
                    .collect()
            }
            Outbound::Misbehaving(peer, score) => {
                self.penalties.push((from, peer, score));
                Vec::new()
            }
        }
    }

    /// Broadcasts of `command` sent by `node`.
    pub fn broadcasts_by(&self, node: usize, command: &str) -> usize {
        self.broadcasts
            .iter()
            .filter(|(from, c)| *from == node && *c == command)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_layout() {
        let net = Network::new(&[1, 2], 3);
        assert_eq!(net.relay_indices(), 0..2);
        assert_eq!(net.client_indices(), 2..5);
        assert!(net.nodes[0].pool.is_relay());
        assert!(!net.nodes[2].pool.is_relay());
        assert_eq!(net.nodes[0].info.addr, relay_node(1).0.addr);
        assert_eq!(net.nodes[4].directory.nodes().len(), 2);
    }

    #[test]
    fn test_fund_registers_on_every_chain() {
        let mut net = Network::new(&[1], 2);
        let coins = net.fund_for_mixing(1);
        assert_eq!(coins.len(), 2);
        for node in &net.nodes {
            assert_eq!(
                darkmix_ports::ChainView::output_value(&node.chain, &coins[0]),
                Some(COIN + 1)
            );
        }
    }
}

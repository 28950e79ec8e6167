//! Shared fixtures for the pool tests.

use darkmix_crypto::ed25519::SigningKey;
use darkmix_denom::{COLLATERAL_OUTPUT, DARKSEND_COLLATERAL};
use darkmix_ports::memory::{signature_for, MemoryChain, MemoryDirectory, MemoryWallet};
use darkmix_transport::peer::{PeerId, PeerInfo, QueuedOutbox};
use darkmix_types::{
    Amount, OutPoint, RelayNode, RelayNodeState, Script, Transaction, TxIn, TxOut, COIN,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{MixContext, MixingPool, PoolConfig, RelayIdentity, Role};

/// Seed of the relay the pool under test plays.
pub const RELAY_SEED: u8 = 1;

/// Directory entry and node key of a test relay.
pub fn relay_node(seed: u8) -> (RelayNode, SigningKey) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let node = RelayNode {
        vin: TxIn::new(OutPoint::new([seed; 32], 0)),
        addr: format!("10.0.0.{seed}:9999").parse().expect("addr"),
        collateral_key: key.verifying_key(),
        node_key: key.verifying_key(),
        sig_time: 1_000 + i64::from(seed),
        last_seen: 1_000 + i64::from(seed),
        protocol_version: 70054,
        last_dsq: 0,
        input_age: 1000,
        state: RelayNodeState::Enabled,
    };
    (node, key)
}

pub fn client_peer(n: u8) -> PeerInfo {
    PeerInfo {
        id: PeerId(u64::from(n)),
        addr: format!("192.168.1.{n}:9999").parse().expect("addr"),
        version: 70054,
    }
}

/// One node's collaborators, clock and RNG.
pub struct Harness {
    pub chain: MemoryChain,
    pub directory: MemoryDirectory,
    pub wallet: MemoryWallet,
    pub outbox: QueuedOutbox,
    pub rng: StdRng,
    pub now_ms: i64,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            chain: MemoryChain::new(1000),
            directory: MemoryDirectory::new((1..=5).map(|s| relay_node(s).0).collect()),
            wallet: MemoryWallet::new([0xAA; 32]),
            outbox: QueuedOutbox::new(),
            rng: StdRng::seed_from_u64(42),
            now_ms: 1_700_000_000_000,
        }
    }

    pub fn ctx(&mut self) -> MixContext<'_> {
        MixContext {
            now_ms: self.now_ms,
            chain: &mut self.chain,
            directory: &mut self.directory,
            wallet: &mut self.wallet,
            outbox: &mut self.outbox,
            rng: &mut self.rng,
        }
    }

    pub fn relay_pool(&mut self, seed: u8) -> MixingPool {
        let role = Role::Relay(RelayIdentity {
            vin: TxIn::new(OutPoint::new([seed; 32], 0)),
            node_key: Some(SigningKey::from_bytes(&[seed; 32])),
        });
        let mut pool = MixingPool::new(PoolConfig::default(), role, &mut self.rng);
        pool.last_state_change_ms = self.now_ms;
        pool
    }

    pub fn client_pool(&mut self) -> MixingPool {
        let mut pool = MixingPool::new(PoolConfig::default(), Role::Client, &mut self.rng);
        pool.last_state_change_ms = self.now_ms;
        pool
    }

    /// A signed collateral the chain knows the input of.
    pub fn collateral(&mut self, seed: u8) -> Transaction {
        let prevout = OutPoint::new([0x40u8.wrapping_add(seed); 32], 1);
        self.chain.add_output(prevout, COLLATERAL_OUTPUT);
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

    /// `count` one-coin inputs known to the chain and matching outputs.
    pub fn entry_parts(&mut self, seed: u8, count: u32) -> (Vec<TxIn>, Amount, Vec<TxOut>) {
        let hash = [0x80u8.wrapping_add(seed); 32];
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for n in 0..count {
            let prevout = OutPoint::new(hash, n);
            self.chain.add_output(prevout, COIN + 1);
            inputs.push(TxIn::new(prevout));
            let mut key_hash = [seed; 20];
            key_hash[0] = n as u8;
            outputs.push(TxOut::new(COIN + 1, Script::p2pkh(&key_hash)));
        }
        (inputs, i64::from(count) * (COIN + 1), outputs)
    }

    /// Fund the wallet and make the chain aware of the new coins.
    pub fn fund(&mut self, values: &[Amount], rounds: i32) -> Vec<OutPoint> {
        let outpoints = self.wallet.fund(values, rounds);
        for (outpoint, value) in outpoints.iter().zip(values) {
            self.chain.add_output(*outpoint, *value);
        }
        outpoints
    }

    /// Fund the wallet with one denominated coin.
    pub fn wallet_coin(&mut self) -> OutPoint {
        self.wallet.fund(&[COIN + 1], 0)[0]
    }
}

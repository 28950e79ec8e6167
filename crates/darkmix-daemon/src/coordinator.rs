//! Serialized access to the node state.
//!
//! The mixing pool, the election and their collaborators live behind one
//! async mutex. Every inbound message, block and tick takes the lock once,
//! runs to completion, and hands back the outbound intents it produced.

use darkmix_election::{ElectionContext, PaymentElection};
use darkmix_ports::memory::{MemoryChain, MemoryDirectory, MemoryWallet};
use darkmix_ports::{ChainView, RelayDirectory};
use darkmix_pool::{MixContext, MixingPool};
use darkmix_transport::messages::{MnGet, TypedMessage};
use darkmix_transport::peer::{Outbound, Outbox, PeerInfo, QueuedOutbox};
use darkmix_transport::wire::ProtocolMessage;
use darkmix_types::PoolState;
use rand::rngs::StdRng;
use tokio::sync::Mutex;

use crate::events::{Event, EventBus, EventKind};
use crate::ticker::TickWork;

/// Payment list sync requests sent after start-up.
const MAX_SYNC_REQUESTS: u32 = 3;

/// Everything one node mutates.
pub struct Node {
    pub pool: MixingPool,
    /// `None` when no election authority is configured.
    pub election: Option<PaymentElection>,
    pub chain: MemoryChain,
    pub directory: MemoryDirectory,
    pub wallet: MemoryWallet,
    pub outbox: QueuedOutbox,
    pub rng: StdRng,
    sync_requests: u32,
}

impl Node {
    pub fn new(
        pool: MixingPool,
        election: Option<PaymentElection>,
        chain: MemoryChain,
        directory: MemoryDirectory,
        wallet: MemoryWallet,
        rng: StdRng,
    ) -> Self {
        Self {
            pool,
            election,
            chain,
            directory,
            wallet,
            outbox: QueuedOutbox::new(),
            rng,
            sync_requests: 0,
        }
    }

    fn mixing(&mut self, now_ms: i64) -> (&mut MixingPool, MixContext<'_>) {
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

    fn election(&mut self) -> Option<(&mut PaymentElection, ElectionContext<'_>)> {
        let election = self.election.as_mut()?;
        let ctx = ElectionContext {
            chain: &self.chain,
            directory: &self.directory,
            outbox: &mut self.outbox,
        };
        Some((election, ctx))
    }
}

/// Pool state before a step, for event diffing.
struct Snapshot {
    state: PoolState,
    session_id: u32,
}

pub struct Coordinator {
    node: Mutex<Node>,
    events: EventBus,
}

impl Coordinator {
    pub fn new(node: Node, events: EventBus) -> Self {
        Self {
            node: Mutex::new(node),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `f` under the node lock.
    pub async fn with_node<R>(&self, f: impl FnOnce(&mut Node) -> R) -> R {
        let mut node = self.node.lock().await;
        f(&mut node)
    }

    /// Dispatch one message to the pool and the election.
    pub async fn handle_message(
        &self,
        peer: &PeerInfo,
        msg: TypedMessage,
        now_ms: i64,
    ) -> Vec<Outbound> {
        let mut guard = self.node.lock().await;
        let node = &mut *guard;
        let before = snapshot(&node.pool);

        if msg.is_election() {
            let height = match &msg {
                TypedMessage::Mnw(w) => Some(w.block_height),
                _ => None,
            };
            let prior = height.and_then(|h| winner_vin(node, h));
            if let Some((election, mut ctx)) = node.election() {
                // Rejections are logged and scored inside the election.
                let _ = election.process_message(&mut ctx, peer, &msg);
            }
            if let Some(h) = height {
                let current = winner_vin(node, h);
                if current.is_some() && current != prior {
                    self.emit(
                        now_ms,
                        EventKind::WinnerAccepted,
                        serde_json::json!({ "height": h, "vin": current }),
                    );
                }
            }
        } else {
            let (pool, mut ctx) = node.mixing(now_ms);
            // Rejections are answered and logged by the pool itself.
            let _ = pool.process_message(&mut ctx, peer, msg);
        }

        self.finish(node, before, now_ms)
    }

    /// Open a frame received from `peer` and dispatch its command.
    /// Frames that fail to open are refused before any state is touched.
    pub async fn handle_frame(
        &self,
        peer: &PeerInfo,
        data: &[u8],
        now_ms: i64,
    ) -> darkmix_transport::Result<Vec<Outbound>> {
        let (frame, msg) = ProtocolMessage::open(data).inspect_err(|e| {
            tracing::warn!(peer = peer.id.0, error = %e, "dropping frame");
        })?;
        tracing::debug!(
            peer = peer.id.0,
            command = msg.command(),
            sent_at = frame.sent_at,
            "frame received"
        );
        Ok(self.handle_message(peer, msg, now_ms).await)
    }

    /// React to a new best block.
    pub async fn new_block(&self, height: u64, now_ms: i64) -> Vec<Outbound> {
        let mut guard = self.node.lock().await;
        let node = &mut *guard;
        let before = snapshot(&node.pool);

        node.chain.set_height(height);
        let (pool, mut ctx) = node.mixing(now_ms);
        pool.new_block(&mut ctx, height);

        if let Some((election, mut ctx)) = node.election() {
            if election.is_enabled() {
                match election.process_block(&mut ctx, height) {
                    Ok(true) => {
                        let vin = election.winning_node(height).map(ToString::to_string);
                        self.emit(
                            now_ms,
                            EventKind::WinnerElected,
                            serde_json::json!({ "height": height, "vin": vin }),
                        );
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(height, error = %e, "could not elect winner"),
                }
            }
        }

        self.finish(node, before, now_ms)
    }

    /// Run the periodic work due on this tick.
    pub async fn tick(&self, work: TickWork, now_ms: i64) -> Vec<Outbound> {
        let mut guard = self.node.lock().await;
        let node = &mut *guard;
        let before = snapshot(&node.pool);

        {
            let (pool, mut ctx) = node.mixing(now_ms);
            if work.check {
                pool.check(&mut ctx);
            }
            if work.trickle
                && !pool.is_relay()
                && !pool.is_downgraded()
                && pool.state() == PoolState::AcceptingEntries
                && !pool.my_entries().is_empty()
            {
                pool.trickle(&mut ctx);
            }
            pool.check_timeout(&mut ctx);
            pool.check_for_complete_queue(&mut ctx);
        }

        if work.request_sync
            && node.sync_requests < MAX_SYNC_REQUESTS
            && !node.chain.is_initial_block_download()
        {
            node.sync_requests += 1;
            tracing::info!(attempt = node.sync_requests, "requesting payment list");
            node.outbox.broadcast(TypedMessage::MnGet(MnGet {}));
        }

        if work.maintenance {
            let best = node.chain.best_height();
            let relays = node.directory.len();
            if let Some(election) = node.election.as_mut() {
                election.clean_payment_list(best, relays);
            }
            node.pool.prune_used_relays(relays);
        }

        if work.auto_denominate {
            let (pool, mut ctx) = node.mixing(now_ms);
            pool.auto_denominate_tick(&mut ctx);
        }

        self.finish(node, before, now_ms)
    }

    fn finish(&self, node: &mut Node, before: Snapshot, now_ms: i64) -> Vec<Outbound> {
        let state = node.pool.state();
        if state != before.state {
            self.emit(
                now_ms,
                EventKind::PoolStateChanged,
                serde_json::json!({
                    "from": before.state.to_string(),
                    "to": state.to_string(),
                    "session_id": before.session_id.max(node.pool.session_id()),
                }),
            );
        }
        for done in node.pool.take_completions() {
            self.emit(
                now_ms,
                EventKind::MixingCompleted,
                serde_json::json!({
                    "session_id": done.session_id,
                    "error": done.error,
                    "message": done.message,
                }),
            );
        }
        node.outbox.drain()
    }

    fn emit(&self, now_ms: i64, kind: EventKind, payload: serde_json::Value) {
        let timestamp = u64::try_from(now_ms / 1000).unwrap_or_default();
        self.events.emit(Event::new(kind, timestamp, payload));
    }
}

fn snapshot(pool: &MixingPool) -> Snapshot {
    Snapshot {
        state: pool.state(),
        session_id: pool.session_id(),
    }
}

fn winner_vin(node: &Node, height: u64) -> Option<String> {
    node.election
        .as_ref()
        .and_then(|e| e.winning_node(height))
        .map(ToString::to_string)
}

//! darkmix-daemon: runs the mixing pool and the payment election.
//!
//! The daemon owns the node state, drives the periodic schedule and emits
//! lifecycle events. Peer connectivity, the chain and the wallet are
//! attached through the collaborator traits; out of the box the in-memory
//! implementations are used.

use std::sync::Arc;
use std::time::Duration;

use darkmix_election::PaymentElection;
use darkmix_pool::MixingPool;
use darkmix_ports::memory::{MemoryChain, MemoryDirectory, MemoryWallet};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use darkmix_daemon::config::DaemonConfig;
use darkmix_daemon::coordinator::{Coordinator, Node};
use darkmix_daemon::events::{self, Event, EventBus, EventFilter, EventKind};
use darkmix_daemon::{relaynodes, ticker};

fn build_election(config: &DaemonConfig) -> anyhow::Result<Option<PaymentElection>> {
    let Some(authority) = config.authority_key()? else {
        warn!("no election authority configured, payment winners are not tracked");
        return Ok(None);
    };
    let mut election = PaymentElection::new(authority);
    if let Some(key) = config.election_key()? {
        if let Err(e) = election.set_private_key(key) {
            error!(error = %e, "election key rejected");
        }
    }
    Ok(Some(election))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("darkmix={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("darkmix daemon starting");

    let data_dir = DaemonConfig::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let relays = relaynodes::load(&data_dir.join("relaynodes.conf"))?;
    for entry in &relays {
        info!(alias = %entry.alias, address = %entry.address, "configured relay");
    }

    let role = config.role()?;
    let mut rng = StdRng::from_entropy();
    let pool = MixingPool::new(config.pool_config(), role, &mut rng);
    let election = build_election(&config)?;

    let mut wallet_seed = [0u8; 32];
    rng.fill_bytes(&mut wallet_seed);
    let node = Node::new(
        pool,
        election,
        MemoryChain::new(0),
        MemoryDirectory::default(),
        MemoryWallet::new(wallet_seed),
        rng,
    );

    let event_bus = EventBus::new(1000);
    let coordinator = Arc::new(Coordinator::new(node, event_bus.clone()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let journal = tokio::spawn(events::log_events(
        event_bus.subscribe(),
        EventFilter::default(),
    ));

    event_bus.emit(Event::new(
        EventKind::DaemonStarted,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "relay": config.relay.enabled,
            "port": config.network.listen_port,
        }),
    ));

    let interval = Duration::from_millis(config.advanced.tick_interval_ms);
    let ticker = tokio::spawn(ticker::run(coordinator, interval, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    let _ = shutdown_tx.send(());
    if let Err(e) = ticker.await {
        error!("ticker task failed: {}", e);
    }

    journal.abort();
    info!("daemon stopped");
    Ok(())
}

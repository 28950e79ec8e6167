//! Periodic pool maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::coordinator::Coordinator;

/// Default time between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(2500);

/// Work due on one tick besides timeouts and the complete-queue check,
/// which run on every tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickWork {
    pub check: bool,
    pub trickle: bool,
    /// Ask peers for the payment list.
    pub request_sync: bool,
    /// Prune the election table and the used-relay list.
    pub maintenance: bool,
    pub auto_denominate: bool,
}

/// What tick number `tick` has to do.
pub fn schedule(tick: u64) -> TickWork {
    TickWork {
        check: tick % 10 == 0,
        trickle: tick % 3 == 0,
        request_sync: tick % 5 == 0,
        maintenance: tick % 60 == 0,
        auto_denominate: tick % 60 == 0,
    }
}

fn now_ms() -> i64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// Tick until shutdown. Outbound intents are handed to the peer layer;
/// without one attached they are logged and dropped.
pub async fn run(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = timer.tick() => {
                tick += 1;
                let out = coordinator.tick(schedule(tick), now_ms()).await;
                for intent in out {
                    tracing::debug!(?intent, "outbound");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!(ticks = tick, "ticker stopped");
                break;
            }
        }
    }
}

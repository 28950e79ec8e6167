//! Event emission.
//!
//! Lifecycle events of the mixing pool and the payment election are pushed
//! to any number of in-process subscribers. A slow subscriber lags and
//! loses the oldest events rather than blocking the coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    DaemonStarted,
    /// The pool moved between states.
    PoolStateChanged,
    /// A round this node took part in finished, successfully or not.
    MixingCompleted,
    /// This node signed the winner for a height.
    WinnerElected,
    /// A gossiped winner became the stored winner for its height.
    WinnerAccepted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Mixing,
    Election,
    System,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DaemonStarted => "DaemonStarted",
            Self::PoolStateChanged => "PoolStateChanged",
            Self::MixingCompleted => "MixingCompleted",
            Self::WinnerElected => "WinnerElected",
            Self::WinnerAccepted => "WinnerAccepted",
        }
    }

    pub fn category(self) -> EventCategory {
        match self {
            Self::PoolStateChanged | Self::MixingCompleted => EventCategory::Mixing,
            Self::WinnerElected | Self::WinnerAccepted => EventCategory::Election,
            Self::DaemonStarted => EventCategory::System,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub category: EventCategory,
    /// Unix seconds.
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: u64, payload: serde_json::Value) -> Self {
        Self {
            event_type: kind.name().to_string(),
            category: kind.category(),
            timestamp,
            payload,
        }
    }
}

/// Which categories a subscriber cares about. `None` means all.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub categories: Option<Vec<EventCategory>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match &self.categories {
            Some(categories) => categories.contains(&event.category),
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(event_type = %event.event_type, "emit");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// Write matching events to the log until the bus closes.
pub async fn log_events(mut rx: broadcast::Receiver<Event>, filter: EventFilter) {
    loop {
        match rx.recv().await {
            Ok(event) if filter.matches(&event) => {
                tracing::info!(
                    category = ?event.category,
                    payload = %event.payload,
                    "{}",
                    event.event_type
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

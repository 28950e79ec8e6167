//! Per-height winner records.

use std::collections::BTreeMap;

use darkmix_types::{OutPoint, PaymentWinner, Script, TxIn};

/// Heights below the best block replayed on sync.
pub const SYNC_BEHIND: u64 = 10;
/// Heights above the best block replayed on sync.
pub const SYNC_AHEAD: u64 = 20;

/// Minimum number of blocks a record is kept for.
pub const MIN_RETENTION: u64 = 1000;

/// Blocks a record survives behind the best height.
pub fn retention(relay_count: usize) -> u64 {
    (relay_count as u64).saturating_mul(2).max(MIN_RETENTION)
}

/// At most one winner per height. A stored score never decreases.
#[derive(Clone, Debug, Default)]
pub struct WinnerTable {
    by_height: BTreeMap<u64, PaymentWinner>,
}

impl WinnerTable {
    /// Store `winner` if its height is empty or its score is strictly
    /// larger than the stored one. Returns whether the table changed.
    pub fn add(&mut self, winner: PaymentWinner) -> bool {
        match self.by_height.get_mut(&winner.block_height) {
            None => {
                self.by_height.insert(winner.block_height, winner);
                true
            }
            Some(current) if winner.score > current.score => {
                *current = winner;
                true
            }
            Some(_) => false,
        }
    }

    pub fn get(&self, height: u64) -> Option<&PaymentWinner> {
        self.by_height.get(&height)
    }

    pub fn payee(&self, height: u64) -> Option<&Script> {
        self.get(height).map(|w| &w.payee)
    }

    pub fn winning_vin(&self, height: u64) -> Option<&TxIn> {
        self.get(height).map(|w| &w.vin)
    }

    /// Relays paid in the latest full cycle, newest first. The scan stops
    /// at the first relay seen twice.
    pub fn recent_cycle(&self) -> Vec<OutPoint> {
        let mut cycle: Vec<OutPoint> = Vec::new();
        for winner in self.by_height.values().rev() {
            if cycle.contains(&winner.vin.prevout) {
                break;
            }
            cycle.push(winner.vin.prevout);
        }
        cycle
    }

    /// Drop records more than `max(2 * relay_count, 1000)` blocks behind
    /// `best`. Returns how many were removed.
    pub fn prune(&mut self, best: u64, relay_count: usize) -> usize {
        let limit = retention(relay_count);
        let before = self.by_height.len();
        self.by_height
            .retain(|height, _| best.saturating_sub(*height) <= limit);
        before - self.by_height.len()
    }

    /// Records inside the sync window around `best`.
    pub fn sync_window(&self, best: u64) -> impl Iterator<Item = &PaymentWinner> {
        let from = best.saturating_sub(SYNC_BEHIND);
        self.by_height
            .range(from..=best + SYNC_AHEAD)
            .map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }
}

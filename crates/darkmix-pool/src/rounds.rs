//! Mixing depth of wallet inputs.
//!
//! A denominated output has been mixed `n` times when its funding
//! transaction has only denominated outputs and the shortest chain of our
//! own denominated inputs behind it is `n - 1` deep.

use std::collections::HashMap;

use darkmix_denom::codec::{is_collateral_amount, is_denominated_amount};
use darkmix_ports::Wallet;
use darkmix_types::{OutPoint, TxIn};

/// Walks deeper than this are cut short.
const MAX_DEPTH: i32 = 17;

/// Output index past the end of its transaction.
pub const ROUNDS_OUT_OF_BOUNDS: i32 = -4;
/// Output is a collateral coin.
pub const ROUNDS_COLLATERAL: i32 = -3;
/// Output value is not a denomination.
pub const ROUNDS_NOT_DENOMINATED: i32 = -2;

/// Memoized rounds per outpoint. Funding transactions never change, so
/// entries stay valid for the life of the wallet.
#[derive(Debug, Default)]
pub struct RoundsMemo {
    memo: HashMap<OutPoint, i32>,
}

impl RoundsMemo {
    /// Rounds of `input`, starting the walk at depth `rounds`.
    pub fn input_rounds(&mut self, wallet: &dyn Wallet, input: &TxIn, rounds: i32) -> i32 {
        if rounds >= MAX_DEPTH {
            return rounds;
        }
        let prevout = input.prevout;
        let Some(tx) = wallet.transaction(&prevout.hash) else {
            return rounds - 1;
        };
        if let Some(&known) = self.memo.get(&prevout) {
            return known;
        }

        let Some(out) = tx.vout.get(prevout.n as usize) else {
            return self.remember(prevout, ROUNDS_OUT_OF_BOUNDS);
        };
        if is_collateral_amount(out.value) {
            return self.remember(prevout, ROUNDS_COLLATERAL);
        }
        if !is_denominated_amount(out.value) {
            return self.remember(prevout, ROUNDS_NOT_DENOMINATED);
        }
        if !tx.vout.iter().all(|o| is_denominated_amount(o.value)) {
            return self.remember(prevout, 0);
        }

        let shortest = tx
            .vin
            .iter()
            .filter(|parent| wallet.is_mine(parent))
            .map(|parent| self.input_rounds(wallet, parent, rounds + 1))
            .filter(|n| *n >= 0)
            .min();
        self.remember(prevout, shortest.map_or(0, |n| n + 1))
    }

    /// Mean rounds over the wallet's denominated coins, 0 when there are
    /// none.
    pub fn average_anonymized_rounds(&mut self, wallet: &dyn Wallet) -> f64 {
        let coins = wallet.denominated_coins();
        if coins.is_empty() {
            return 0.0;
        }
        let total: i64 = coins
            .iter()
            .map(|c| i64::from(self.input_rounds(wallet, &c.input, 0)))
            .sum();
        total as f64 / coins.len() as f64
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }

    fn remember(&mut self, prevout: OutPoint, rounds: i32) -> i32 {
        self.memo.insert(prevout, rounds);
        rounds
    }
}

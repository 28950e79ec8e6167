//! # darkmix-denom
//!
//! Denomination codec and the protocol's monetary constants.
//!
//! A set of outputs is summarised as a bitmask: bit `i` is set when some
//! output equals [`DENOMINATIONS`]`[i]`. Two participants are compatible
//! only if their bitmasks are equal.
//!
//! ## Modules
//!
//! - [`codec`] — Bitmask computation and rendering
//! - [`split`] — Breaking an amount into denominated outputs

pub mod codec;
pub mod split;

pub use codec::{
    denominations_by_amount, denominations_by_amounts, denominations_of,
    denominations_of_outputs, denominations_to_string, format_amount, is_collateral_amount,
    is_denominated_amount,
};
pub use split::split_into_denominations;

use darkmix_types::{Amount, CENT, COIN};

/// Canonical mixing amounts, largest first. The trailing base unit makes
/// denominated outputs recognisable on chain.
pub const DENOMINATIONS: [Amount; 4] = [
    100 * COIN + 1,
    10 * COIN + 1,
    COIN + 1,
    COIN / 10 + 1,
];

/// Bit flagging a queue that accepts non-denominated input.
pub const NON_DENOM_BIT: u32 = 1 << 4;

/// Minimum fee a collateral transaction must burn.
pub const DARKSEND_COLLATERAL: Amount = COIN / 100;

/// Network fee unit used when building denominations.
pub const DARKSEND_FEE: Amount = COIN / 100;

/// Value of a dedicated collateral output.
pub const COLLATERAL_OUTPUT: Amount = DARKSEND_FEE * 4;

/// Largest input value accepted into one round.
pub const POOL_MAX: Amount = 999 * COIN + 99 * CENT;

/// Error types for denomination handling.
#[derive(Debug, thiserror::Error)]
pub enum DenomError {
    /// Amount cannot be denominated.
    #[error("amount {0} is below the smallest denomination")]
    TooSmall(Amount),

    /// Negative amount.
    #[error("negative amount {0}")]
    Negative(Amount),
}

pub type Result<T> = std::result::Result<T, DenomError>;

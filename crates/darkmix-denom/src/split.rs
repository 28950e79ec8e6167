//! Splitting a balance into denominated outputs.

use darkmix_types::Amount;

use crate::{DenomError, Result, COLLATERAL_OUTPUT, DARKSEND_FEE, DENOMINATIONS};

/// Most outputs of a single denomination produced by one split.
pub const MAX_OUTPUTS_PER_DENOM: usize = 11;

/// Output values for a denominating payment to self.
///
/// With `with_collateral` the first value is a dedicated collateral output.
/// Denominations are then added smallest first, each at most
/// [`MAX_OUTPUTS_PER_DENOM`] times, while at least [`DARKSEND_FEE`] stays
/// behind for the network fee. The unallocated rest is left to the wallet
/// as change.
pub fn split_into_denominations(total: Amount, with_collateral: bool) -> Result<Vec<Amount>> {
    if total < 0 {
        return Err(DenomError::Negative(total));
    }
    let mut left = total;
    let mut values = Vec::new();

    if with_collateral {
        values.push(COLLATERAL_OUTPUT);
        left -= COLLATERAL_OUTPUT;
    }

    for &d in DENOMINATIONS.iter().rev() {
        let mut count = 0;
        while left - d >= DARKSEND_FEE && count < MAX_OUTPUTS_PER_DENOM {
            values.push(d);
            left -= d;
            count += 1;
        }
    }

    let denominated = values.iter().filter(|v| DENOMINATIONS.contains(v)).count();
    if denominated == 0 {
        return Err(DenomError::TooSmall(total));
    }

    tracing::debug!(total, outputs = values.len(), left, "split into denominations");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_types::COIN;

    #[test]
    fn test_split_small_amount() {
        let values = split_into_denominations(COIN / 2, false).expect("split");
        assert_eq!(values, vec![COIN / 10 + 1; 4]);
    }

    #[test]
    fn test_split_caps_each_denomination() {
        let values = split_into_denominations(30 * COIN, false).expect("split");
        let tenths = values.iter().filter(|&&v| v == COIN / 10 + 1).count();
        let ones = values.iter().filter(|&&v| v == COIN + 1).count();
        let tens = values.iter().filter(|&&v| v == 10 * COIN + 1).count();
        assert_eq!(tenths, MAX_OUTPUTS_PER_DENOM);
        assert_eq!(ones, MAX_OUTPUTS_PER_DENOM);
        assert_eq!(tens, 1);
        let spent: Amount = values.iter().sum();
        assert!(30 * COIN - spent >= DARKSEND_FEE);
    }

    #[test]
    fn test_split_with_collateral() {
        let values = split_into_denominations(COIN, true).expect("split");
        assert_eq!(values[0], COLLATERAL_OUTPUT);
        assert!(values[1..].iter().all(|v| *v == COIN / 10 + 1));
    }

    #[test]
    fn test_split_too_small() {
        assert!(matches!(
            split_into_denominations(COIN / 20, false),
            Err(DenomError::TooSmall(_))
        ));
        assert!(split_into_denominations(-1, false).is_err());
    }
}

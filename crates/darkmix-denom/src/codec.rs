//! Bitmask encoding of denominated output sets.

use darkmix_types::{Amount, TxOut, COIN};

use crate::{COLLATERAL_OUTPUT, DENOMINATIONS};

/// Bitmask for a list of output values.
///
/// Returns 0 if any value is not a denomination. Bit `i` corresponds to
/// `DENOMINATIONS[i]`, so the result does not depend on output order.
pub fn denominations_of(values: &[Amount]) -> u32 {
    let mut used = [false; DENOMINATIONS.len()];
    for value in values {
        match DENOMINATIONS.iter().position(|d| d == value) {
            Some(i) => used[i] = true,
            None => return 0,
        }
    }
    used.iter()
        .enumerate()
        .fold(0u32, |acc, (i, &u)| acc | (u32::from(u) << i))
}

/// Bitmask for transaction outputs.
pub fn denominations_of_outputs(outputs: &[TxOut]) -> u32 {
    let values: Vec<Amount> = outputs.iter().map(|o| o.value).collect();
    denominations_of(&values)
}

/// Bitmask for the values of selected coins.
pub fn denominations_by_amounts(amounts: &[Amount]) -> u32 {
    denominations_of(amounts)
}

/// Bitmask produced by greedily splitting `amount`, smallest denomination
/// first, at most 11 outputs each.
///
/// `target` restricts the split to the denominations whose bits are set
/// (0 means all). Any remainder becomes a non-denominated output, which
/// makes the result 0.
pub fn denominations_by_amount(amount: Amount, target: u32) -> u32 {
    let mut left = amount;
    let mut values = Vec::new();
    for (i, &d) in DENOMINATIONS.iter().enumerate().rev() {
        if target != 0 && target & (1 << i) == 0 {
            continue;
        }
        let mut count = 0;
        while left - d >= 0 && count <= 10 {
            values.push(d);
            left -= d;
            count += 1;
        }
    }
    if left > 0 {
        values.push(left);
    }
    denominations_of(&values)
}

/// Human readable list such as `"100+1"`.
pub fn denominations_to_string(denom: u32) -> String {
    let parts: Vec<String> = DENOMINATIONS
        .iter()
        .enumerate()
        .filter(|(i, _)| denom & (1 << i) != 0)
        .map(|(_, &d)| format_amount_short(d - 1))
        .collect();
    parts.join("+")
}

fn format_amount_short(value: Amount) -> String {
    let whole = value / COIN;
    let frac = value % COIN;
    if frac == 0 {
        whole.to_string()
    } else {
        let digits = format!("{frac:08}");
        format!("{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Full-precision rendering, e.g. `1.00000001`.
pub fn format_amount(value: Amount) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let coin = COIN.unsigned_abs();
    format!("{sign}{}.{:08}", abs / coin, abs % coin)
}

pub fn is_denominated_amount(value: Amount) -> bool {
    DENOMINATIONS.contains(&value)
}

/// True for the dedicated collateral output value.
pub fn is_collateral_amount(value: Amount) -> bool {
    value == COLLATERAL_OUTPUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_types::Script;

    #[test]
    fn test_single_denominations() {
        assert_eq!(denominations_of(&[100 * COIN + 1]), 1);
        assert_eq!(denominations_of(&[10 * COIN + 1]), 2);
        assert_eq!(denominations_of(&[COIN + 1]), 4);
        assert_eq!(denominations_of(&[COIN / 10 + 1]), 8);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = denominations_of(&[COIN + 1, COIN / 10 + 1, COIN + 1]);
        let b = denominations_of(&[COIN / 10 + 1, COIN + 1, COIN + 1]);
        assert_eq!(a, b);
        assert_eq!(a, 4 | 8);
    }

    #[test]
    fn test_non_denominated_value_zeroes_mask() {
        assert_eq!(denominations_of(&[COIN + 1, COIN]), 0);
        assert_eq!(denominations_of(&[]), 0);
    }

    #[test]
    fn test_outputs_mask() {
        let outs = vec![
            TxOut::new(COIN + 1, Script::default()),
            TxOut::new(10 * COIN + 1, Script::default()),
        ];
        assert_eq!(denominations_of_outputs(&outs), 2 | 4);
    }

    #[test]
    fn test_by_amount_exact() {
        assert_eq!(denominations_by_amount(COIN / 10 + 1, 0), 8);
        assert_eq!(denominations_by_amount(3 * (COIN + 1), 4), 4);
    }

    #[test]
    fn test_by_amount_fills_smallest_first() {
        // Nine 0.1 outputs fit in 1.00000001 and leave a non-denominated rest.
        assert_eq!(denominations_by_amount(COIN + 1, 0), 0);
    }

    #[test]
    fn test_by_amount_with_remainder_is_zero() {
        assert_eq!(denominations_by_amount(COIN + 5, 0), 0);
    }

    #[test]
    fn test_by_amount_with_target() {
        // Only the 0.1 denomination allowed.
        let amount = 3 * (COIN / 10 + 1);
        assert_eq!(denominations_by_amount(amount, 8), 8);
        assert_eq!(denominations_by_amount(COIN + 1, 8), 0);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(denominations_to_string(1 | 4), "100+1");
        assert_eq!(denominations_to_string(8), "0.1");
        assert_eq!(denominations_to_string(0), "");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(COIN + 1), "1.00000001");
        assert_eq!(format_amount(-COIN / 2), "-0.50000000");
    }

    #[test]
    fn test_amount_predicates() {
        assert!(is_denominated_amount(COIN + 1));
        assert!(!is_denominated_amount(COIN));
        assert!(is_collateral_amount(COIN / 25));
        assert!(!is_collateral_amount(COIN / 100));
    }
}

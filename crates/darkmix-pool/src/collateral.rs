//! Collateral validity.

use darkmix_denom::DARKSEND_COLLATERAL;
use darkmix_ports::ChainView;
use darkmix_types::Transaction;

/// A collateral transaction is valid when it could be charged: it pays at
/// least [`DARKSEND_COLLATERAL`] in fees from known inputs to standard
/// outputs, is final, and the mempool would take it.
pub fn is_collateral_valid(chain: &dyn ChainView, tx: &Transaction) -> bool {
    if tx.vout.is_empty() || tx.lock_time != 0 {
        return false;
    }
    if !tx
        .vout
        .iter()
        .all(|o| o.script_pubkey.is_normal_payment_script())
    {
        tracing::debug!("collateral has non-standard output");
        return false;
    }

    let mut value_in = 0;
    for input in &tx.vin {
        match chain.output_value(&input.prevout) {
            Some(value) => value_in += value,
            None => {
                tracing::debug!(input = %input, "collateral input unknown");
                return false;
            }
        }
    }

    if value_in - tx.value_out() < DARKSEND_COLLATERAL {
        tracing::debug!(value_in, value_out = tx.value_out(), "collateral fee too low");
        return false;
    }

    chain.acceptable_inputs(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_denom::COLLATERAL_OUTPUT;
    use darkmix_ports::memory::MemoryChain;
    use darkmix_types::{OutPoint, Script, TxIn, TxOut};

    fn setup() -> (MemoryChain, Transaction) {
        let mut chain = MemoryChain::new(100);
        let op = OutPoint::new([8; 32], 0);
        chain.add_output(op, COLLATERAL_OUTPUT);
        let tx = Transaction::new(
            vec![TxIn::new(op)],
            vec![TxOut::new(
                COLLATERAL_OUTPUT - DARKSEND_COLLATERAL,
                Script::p2pkh(&[1; 20]),
            )],
        );
        (chain, tx)
    }

    #[test]
    fn test_valid_collateral() {
        let (chain, tx) = setup();
        assert!(is_collateral_valid(&chain, &tx));
    }

    #[test]
    fn test_fee_too_low() {
        let (chain, mut tx) = setup();
        tx.vout[0].value += 1;
        assert!(!is_collateral_valid(&chain, &tx));
    }

    #[test]
    fn test_no_outputs_or_locktime() {
        let (chain, tx) = setup();
        let mut empty = tx.clone();
        empty.vout.clear();
        assert!(!is_collateral_valid(&chain, &empty));

        let mut locked = tx;
        locked.lock_time = 5;
        assert!(!is_collateral_valid(&chain, &locked));
    }

    #[test]
    fn test_nonstandard_output() {
        let (chain, mut tx) = setup();
        tx.vout[0].script_pubkey = Script(vec![0x6a]);
        assert!(!is_collateral_valid(&chain, &tx));
    }

    #[test]
    fn test_unknown_input() {
        let (chain, mut tx) = setup();
        tx.vin[0].prevout = OutPoint::new([9; 32], 0);
        assert!(!is_collateral_valid(&chain, &tx));
    }

    #[test]
    fn test_mempool_refusal() {
        let (mut chain, tx) = setup();
        chain.refuse_spend(tx.vin[0].prevout);
        assert!(!is_collateral_valid(&chain, &tx));
    }
}

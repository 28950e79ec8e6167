//! Admitted entries.
//!
//! Inputs and outputs carry protocol bookkeeping by composition: whether a
//! signature arrived for the input and how often each item was trickled.

use darkmix_types::{Amount, OutPoint, Transaction, TxIn, TxOut};

use crate::ENTRY_TTL_SECS;

/// An input with signing and trickle bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInput {
    pub input: TxIn,
    pub has_sig: bool,
    pub sent_times: u32,
}

impl EntryInput {
    pub fn new(input: TxIn) -> Self {
        Self {
            input,
            has_sig: false,
            sent_times: 0,
        }
    }

    /// Same spend: prevout and sequence agree.
    pub fn matches(&self, other: &TxIn) -> bool {
        self.input.prevout == other.prevout && self.input.sequence == other.sequence
    }
}

/// An output with trickle bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryOutput {
    pub output: TxOut,
    pub sent_times: u32,
}

impl EntryOutput {
    pub fn new(output: TxOut) -> Self {
        Self {
            output,
            sent_times: 0,
        }
    }
}

/// One participant's contribution to a round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub inputs: Vec<EntryInput>,
    /// Declared input value.
    pub amount: Amount,
    pub collateral: Transaction,
    pub outputs: Vec<EntryOutput>,
    /// Unix seconds when the entry was added.
    pub added_at: i64,
}

impl Entry {
    pub fn new(
        inputs: Vec<TxIn>,
        amount: Amount,
        collateral: Transaction,
        outputs: Vec<TxOut>,
        added_at: i64,
    ) -> Self {
        Self {
            inputs: inputs.into_iter().map(EntryInput::new).collect(),
            amount,
            collateral,
            outputs: outputs.into_iter().map(EntryOutput::new).collect(),
            added_at,
        }
    }

    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs - self.added_at > ENTRY_TTL_SECS
    }

    pub fn spends(&self, prevout: &OutPoint) -> bool {
        self.inputs.iter().any(|i| i.input.prevout == *prevout)
    }

    /// Record a signature for the matching input. Returns false if no
    /// input matches.
    pub fn add_sig(&mut self, signed: &TxIn) -> bool {
        match self.inputs.iter_mut().find(|i| i.matches(signed)) {
            Some(slot) => {
                slot.input.script_sig = signed.script_sig.clone();
                slot.has_sig = true;
                true
            }
            None => false,
        }
    }

    pub fn tx_inputs(&self) -> Vec<TxIn> {
        self.inputs.iter().map(|i| i.input.clone()).collect()
    }

    pub fn tx_outputs(&self) -> Vec<TxOut> {
        self.outputs.iter().map(|o| o.output.clone()).collect()
    }

    pub fn output_value(&self) -> Amount {
        self.outputs.iter().map(|o| o.output.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkmix_types::{Script, COIN};

    fn entry() -> Entry {
        Entry::new(
            vec![
                TxIn::new(OutPoint::new([1; 32], 0)),
                TxIn::new(OutPoint::new([1; 32], 1)),
            ],
            2 * (COIN + 1),
            Transaction::default(),
            vec![
                TxOut::new(COIN + 1, Script::p2pkh(&[1; 20])),
                TxOut::new(COIN + 1, Script::p2pkh(&[2; 20])),
            ],
            1_000,
        )
    }

    #[test]
    fn test_expiry() {
        let e = entry();
        assert!(!e.is_expired(1_030));
        assert!(e.is_expired(1_031));
    }

    #[test]
    fn test_add_sig_sets_flag() {
        let mut e = entry();
        let mut signed = TxIn::new(OutPoint::new([1; 32], 1));
        signed.script_sig = Script(vec![9, 9]);
        assert!(e.add_sig(&signed));
        assert!(e.inputs[1].has_sig);
        assert!(!e.inputs[0].has_sig);
        assert_eq!(e.inputs[1].input.script_sig, Script(vec![9, 9]));

        let mut other_seq = signed.clone();
        other_seq.sequence = 0;
        assert!(!e.add_sig(&other_seq));
    }

    #[test]
    fn test_values() {
        let e = entry();
        assert_eq!(e.output_value(), 2 * (COIN + 1));
        assert!(e.spends(&OutPoint::new([1; 32], 0)));
        assert!(!e.spends(&OutPoint::new([2; 32], 0)));
        assert_eq!(e.tx_inputs().len(), 2);
        assert_eq!(e.tx_outputs().len(), 2);
    }
}

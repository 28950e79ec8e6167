//! Accumulator for items relayed anonymously through the relay chain.

use darkmix_types::{TxIn, TxOut};
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::entry::EntryInput;

/// Inputs, outputs and signatures received as `dsai` envelopes.
///
/// Order carries no information: the lists are reshuffled on every insert.
#[derive(Clone, Debug, Default)]
pub struct AnonAccumulator {
    inputs: Vec<EntryInput>,
    outputs: Vec<TxOut>,
}

impl AnonAccumulator {
    /// Add an input unless one with the same prevout and sequence exists.
    pub fn add_input(&mut self, input: TxIn, rng: &mut dyn RngCore) -> bool {
        if self.inputs.iter().any(|i| i.matches(&input)) {
            return false;
        }
        self.inputs.push(EntryInput::new(input));
        self.inputs.shuffle(rng);
        true
    }

    /// Add an output unless one with the same value and script exists.
    pub fn add_output(&mut self, output: TxOut, rng: &mut dyn RngCore) -> bool {
        if self
            .outputs
            .iter()
            .any(|o| o.value == output.value && o.script_pubkey == output.script_pubkey)
        {
            return false;
        }
        self.outputs.push(output);
        self.outputs.shuffle(rng);
        true
    }

    /// Attach a signature to the matching input.
    pub fn add_sig(&mut self, signed: &TxIn) -> bool {
        match self.inputs.iter_mut().find(|i| i.matches(signed)) {
            Some(slot) => {
                slot.input.script_sig = signed.script_sig.clone();
                slot.input.prev_pub_key = signed.prev_pub_key.clone();
                slot.has_sig = true;
                true
            }
            None => false,
        }
    }

    /// Inputs plus outputs held.
    pub fn count(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn inputs(&self) -> &[EntryInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }
}

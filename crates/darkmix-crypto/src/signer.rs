//! Signatures over short text protocol messages.
//!
//! Queue announcements, freshness proofs and payment winners are all signed
//! as strings (for example the decimal block height). The string is first
//! bound to [`contexts::SIGNED_MESSAGE`] so a signature made here can never be
//! replayed as a signature over raw transaction bytes.
//!
//! The per-round [`SharedKey`] is handed out by the relay in its ready queue
//! announcement and authenticates anonymous envelope items.

use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::blake3::{self, contexts};
use crate::ed25519::{Signature, SigningKey, VerifyingKey};
use crate::{CryptoError, Result};

fn message_digest(message: &str) -> [u8; 32] {
    blake3::derive_key(contexts::SIGNED_MESSAGE, message.as_bytes())
}

/// Sign a text message with a node identity key.
pub fn sign_message(key: &SigningKey, message: &str) -> Signature {
    key.sign(&message_digest(message))
}

/// Verify a text message signature.
pub fn verify_message(key: &VerifyingKey, signature: &Signature, message: &str) -> Result<()> {
    key.verify(&message_digest(message), signature)
}

/// Per-round symmetric key distributed to session participants.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Draw a fresh key.
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    fn mac_key(&self) -> [u8; 32] {
        blake3::derive_key(contexts::SHARED_KEY_MAC, &self.0)
    }

    /// MAC over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; 32] {
        blake3::keyed_hash(&self.mac_key(), message)
    }

    /// Check a MAC produced by [`SharedKey::sign`].
    pub fn verify(&self, message: &[u8], tag: &[u8; 32]) -> Result<()> {
        if blake3::mac_eq(&self.sign(message), tag) {
            Ok(())
        } else {
            Err(CryptoError::MacMismatch)
        }
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

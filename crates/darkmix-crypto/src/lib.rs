//! # darkmix-crypto
//!
//! Cryptographic primitives used by the mixing and election protocols.
//!
//! The suite is fixed: Ed25519 for node identity signatures and BLAKE3 for
//! hashing, key derivation and the per-round shared-key MAC.
//!
//! ## Modules
//!
//! - [`blake3`] — Domain-separated BLAKE3 hashing and context strings
//! - [`ed25519`] — Ed25519 signing and verification
//! - [`signer`] — Signatures over short protocol messages and the round shared key

pub mod blake3;
pub mod ed25519;
pub mod signer;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Shared-key MAC did not match.
    #[error("shared key MAC mismatch")]
    MacMismatch,

    /// Key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

//! Domain-separated BLAKE3 hashing.
//!
//! ## Modes
//!
//! - [`hash`] — Plain hashing: block-hash scoring input, collateral prevouts
//! - [`derive_key`] — Context-bound digests: signed-message digests, transaction ids
//! - [`keyed_hash`] — Keyed MAC: the per-round shared-key signature on relay envelopes
//!
//! Every `derive_key` call takes one of the strings in [`contexts`].

/// Registered BLAKE3 context strings.
pub mod contexts {
    /// Digest of a text message signed by a node identity key.
    pub const SIGNED_MESSAGE: &str = "Darkmix v1 signed-message";
    /// MAC key derivation for the per-round relay shared key.
    pub const SHARED_KEY_MAC: &str = "Darkmix v1 relay-shared-key";
    /// Transaction identifier over the canonical encoding.
    pub const TRANSACTION_ID: &str = "Darkmix v1 transaction-id";
    /// Height commitment used by the payment winner hash.
    pub const BLOCK_HEIGHT: &str = "Darkmix v1 block-height";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[
        SIGNED_MESSAGE,
        SHARED_KEY_MAC,
        TRANSACTION_ID,
        BLOCK_HEIGHT,
    ];
}

/// Compute BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a 32-byte value using BLAKE3's key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "Darkmix v1 ")
/// * `key_material` - The input material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    *hasher.finalize().as_bytes()
}

/// Compute a keyed BLAKE3 hash (MAC).
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Constant-time equality for MAC tags.
pub fn mac_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    ::blake3::Hash::from(*a) == ::blake3::Hash::from(*b)
}

/// Verify that a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}

//! # darkmix-transport
//!
//! Message layer shared by the mixing pool and the payment election.
//!
//! - **Message types** for every protocol payload via [`messages`]
//! - **Wire protocol** envelope (CBOR-serialized) via [`wire`]
//! - **CBOR serialization** helpers via [`cbor`]
//! - **Peer handles** and the [`peer::Outbox`] seam through which protocol
//!   code emits messages via [`peer`]
//!
//! ## Architecture
//!
//! ```text
//! Pool / Election
//!     |  Outbox::send / broadcast / send_to_addr
//!     v
//! QueuedOutbox (peer.rs)      -- buffered outbound intents
//!     |
//!     v
//! ProtocolMessage (wire.rs)   -- CBOR frame with version, type, payload
//!     |
//!     v
//! peer connections (owned by the host node)
//! ```

pub mod cbor;
pub mod messages;
pub mod peer;
pub mod wire;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (version mismatch, oversized payload, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Serialization("test".to_string());
        assert_eq!(err.to_string(), "serialization error: test");
        let err = TransportError::ProtocolViolation("bad version".to_string());
        assert_eq!(err.to_string(), "protocol violation: bad version");
    }
}

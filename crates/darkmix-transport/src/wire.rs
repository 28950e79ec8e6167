//! Frames exchanged between peers.
//!
//! ```text
//! Frame {
//!     version:  u8,       // frame layout version (1)
//!     msg_type: u16,      // command code, see messages.rs
//!     msg_id:   [u8; 16], // random, lets peers drop duplicates
//!     sent_at:  u64,      // sender clock, unix seconds
//!     payload:  Vec<u8>,  // CBOR TypedMessage
//! }
//! ```
//!
//! A frame is checked before its payload is touched: unknown layout
//! versions and payloads larger than a full joint transaction are refused.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::messages::TypedMessage;
use crate::{Result, TransportError};

/// Frame layout version.
pub const FRAME_VERSION: u8 = 1;

/// Largest payload accepted. A `dsf` for a full round with signatures is
/// well below this.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub version: u8,
    pub msg_type: u16,
    pub msg_id: [u8; 16],
    pub sent_at: u64,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    /// Frame `msg` for sending at `now_secs`.
    pub fn seal(msg: &TypedMessage, now_secs: u64, rng: &mut dyn RngCore) -> Result<Self> {
        let mut msg_id = [0u8; 16];
        rng.fill_bytes(&mut msg_id);
        Ok(Self {
            version: FRAME_VERSION,
            msg_type: msg.msg_type(),
            msg_id,
            sent_at: now_secs,
            payload: cbor::to_vec(msg)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    /// Parse and check a received frame, then decode its command.
    ///
    /// # Errors
    ///
    /// [`TransportError::Deserialization`] for malformed bytes,
    /// [`TransportError::ProtocolViolation`] for a frame that fails
    /// [`check`](Self::check) or whose payload is not the command its
    /// header names.
    pub fn open(data: &[u8]) -> Result<(Self, TypedMessage)> {
        let frame: Self = cbor::from_slice(data)?;
        frame.check()?;
        let msg = frame.decode_payload()?;
        Ok((frame, msg))
    }

    pub fn check(&self) -> Result<()> {
        if self.version != FRAME_VERSION {
            return Err(TransportError::ProtocolViolation(format!(
                "frame version {} (want {FRAME_VERSION})",
                self.version
            )));
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::ProtocolViolation(format!(
                "{} byte payload exceeds {MAX_PAYLOAD_SIZE}",
                self.payload.len()
            )));
        }
        Ok(())
    }

    pub fn decode_payload(&self) -> Result<TypedMessage> {
        let msg: TypedMessage = cbor::from_slice(&self.payload)?;
        if msg.msg_type() != self.msg_type {
            return Err(TransportError::ProtocolViolation(format!(
                "payload is {} but header says {:#06x}",
                msg.command(),
                self.msg_type
            )));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DsStatus, MnGet, MSG_DSSU, MSG_MNGET};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn status() -> TypedMessage {
        TypedMessage::Dssu(DsStatus {
            session_id: 7,
            state: 2,
            entries: 0,
            accepted: 1,
            error: String::new(),
        })
    }

    fn sealed(msg: &TypedMessage) -> ProtocolMessage {
        let mut rng = StdRng::seed_from_u64(3);
        ProtocolMessage::seal(msg, 1_700_000_000, &mut rng).expect("seal")
    }

    #[test]
    fn test_seal_and_open() {
        let frame = sealed(&status());
        assert_eq!(frame.msg_type, MSG_DSSU);
        assert_eq!(frame.sent_at, 1_700_000_000);

        let bytes = frame.to_bytes().expect("serialize");
        let (opened, msg) = ProtocolMessage::open(&bytes).expect("open");
        assert_eq!(opened.msg_id, frame.msg_id);
        assert_eq!(msg, status());
    }

    #[test]
    fn test_header_must_match_payload() {
        let mut frame = sealed(&status());
        frame.msg_type = MSG_MNGET;
        let bytes = frame.to_bytes().expect("serialize");
        assert!(matches!(
            ProtocolMessage::open(&bytes),
            Err(TransportError::ProtocolViolation(_))
        ));

        let get = sealed(&TypedMessage::MnGet(MnGet {}));
        assert!(get.decode_payload().is_ok());
    }

    #[test]
    fn test_unknown_version_refused() {
        let mut frame = sealed(&status());
        frame.version = 99;
        let bytes = frame.to_bytes().expect("serialize");
        assert!(ProtocolMessage::open(&bytes).is_err());
    }

    #[test]
    fn test_oversized_payload_refused() {
        let mut frame = sealed(&status());
        frame.payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(frame.check().is_err());
    }

    #[test]
    fn test_garbage_is_deserialization_error() {
        assert!(matches!(
            ProtocolMessage::open(&[0xff, 0x00, 0x13]),
            Err(TransportError::Deserialization(_))
        ));
    }
}

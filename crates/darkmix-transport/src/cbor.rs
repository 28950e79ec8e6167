//! CBOR (RFC 8949) encoding of payloads and frames, via [`ciborium`].

use serde::{de::DeserializeOwned, Serialize};

use crate::{Result, TransportError};

pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| TransportError::Serialization(e.to_string()))?;
    Ok(out)
}

/// # Errors
///
/// [`TransportError::Deserialization`] when `data` is not a CBOR encoding
/// of `T`.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| TransportError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DsComplete, DsStatus};

    #[test]
    fn test_status_survives_encoding() {
        let status = DsStatus {
            session_id: 42,
            state: 3,
            entries: 1,
            accepted: -1,
            error: String::new(),
        };
        let bytes = to_vec(&status).expect("serialize");
        let restored: DsStatus = from_slice(&bytes).expect("deserialize");
        assert_eq!(restored, status);
    }

    #[test]
    fn test_wrong_shape_is_refused() {
        let status = DsStatus {
            session_id: 1,
            state: 0,
            entries: 0,
            accepted: 1,
            error: String::new(),
        };
        let bytes = to_vec(&status).expect("serialize");
        let result: Result<DsComplete> = from_slice(&bytes);
        assert!(matches!(result, Err(TransportError::Deserialization(_))));
    }

    #[test]
    fn test_empty_input_is_refused() {
        let result: Result<DsStatus> = from_slice(&[]);
        assert!(result.is_err());
    }
}

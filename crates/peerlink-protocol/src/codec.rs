//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" converts between Rust types and raw frame bytes. The
//! coordinator and endpoints only depend on the [`Codec`] trait, so the
//! JSON format could be swapped without touching routing code. JSON is
//! what browser clients of the original deployment speak, so [`JsonCodec`]
//! is the one used everywhere today.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task of the coordinator.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use peerlink_protocol::{ClientMessage, Codec, JsonCodec, PeerId};
///
/// let codec = JsonCodec;
/// let msg = ClientMessage::Register {
///     id: PeerId::from("alice"),
///     display_name: Some("Alice".into()),
/// };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: ClientMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, PeerId, ServerMessage};

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = JsonCodec
            .decode::<ClientMessage>(b"not json")
            .expect_err("garbage must not decode");
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(err.to_string().starts_with("decode failed"));
    }

    #[test]
    fn test_decode_unknown_type_is_decode_error() {
        let err = JsonCodec
            .decode::<ClientMessage>(br#"{"type":"search-peers"}"#)
            .expect_err("unknown type");
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_encode_server_message_is_utf8_json() {
        let bytes = JsonCodec
            .encode(&ServerMessage::PeerLeft {
                id: PeerId::from("x"),
            })
            .unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text, r#"{"type":"peer-left","id":"x"}"#);
    }
}

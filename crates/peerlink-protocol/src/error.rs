//! Error types for the protocol layer.
//!
//! Each crate in PeerLink defines its own error enum. When you see a
//! `ProtocolError`, the problem is in turning frames into messages (or
//! back), not in networking or negotiation.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown `type`, or a missing
    /// required field such as `to`.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but violates protocol rules, e.g. an empty
    /// peer id in `register`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

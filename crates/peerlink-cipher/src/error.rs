//! Error types for the cipher layer.

/// Errors that can occur while deriving keys or sealing/opening envelopes.
///
/// Only [`Cipher::derive`](crate::Cipher::derive), [`Cipher::seal`](crate::Cipher::seal)
/// and [`Cipher::open`](crate::Cipher::open) surface these. The lenient
/// [`Cipher::decode`](crate::Cipher::decode) path folds every failure into
/// a [`Decoded`](crate::Decoded) variant instead.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The key derivation parameters were rejected (salt too short,
    /// memory cost too small, ...).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed. With a valid key this only happens for
    /// payloads beyond the AEAD's size limit.
    #[error("encrypt failed")]
    Encrypt,

    /// Authentication failed: wrong key, or the ciphertext was altered.
    #[error("decrypt failed")]
    Decrypt,

    /// The text is not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

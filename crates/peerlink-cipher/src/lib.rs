//! Payload encryption for PeerLink.
//!
//! Every application message an endpoint sends, over a direct channel or
//! through the coordinator relay, is sealed with one symmetric key shared
//! by the whole deployment:
//!
//! ```text
//! passphrase ──Argon2id(fixed salt, t_cost, m_cost)──▶ 32-byte key
//! plaintext  ──ChaCha20-Poly1305(random 96-bit nonce)──▶ {"nonce", "ciphertext"}
//! ```
//!
//! Receiving is lenient. [`Cipher::decode`] never fails: text that is not
//! an envelope is handed back as [`Decoded::Plaintext`], and an envelope
//! that does not authenticate is handed back as [`Decoded::Undecryptable`]
//! so callers can tell the two apart.

mod error;

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use error::CipherError;

/// Nonce length for ChaCha20-Poly1305 (96 bits).
pub const NONCE_LEN: usize = 12;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

/// Passphrase every stock endpoint derives its key from.
pub const DEFAULT_PASSPHRASE: &str = "peerlink-private-network";

/// Salt paired with [`DEFAULT_PASSPHRASE`]. Argon2 requires at least 8 bytes.
pub const DEFAULT_SALT: &str = "peerlink-deployment-salt-v1";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Key derivation settings.
///
/// **Security note:** the defaults give every endpoint of a deployment the
/// same key. Anyone holding the passphrase can read all traffic, including
/// the coordinator operator if they learn it. There is no per-pair key
/// agreement. Treat this as a "private network" secret, not end-to-end
/// encryption.
#[derive(Clone)]
pub struct CipherConfig {
    /// Shared secret the key is stretched from.
    pub passphrase: String,
    /// Fixed salt. Must be at least 8 bytes.
    pub salt: String,
    /// Argon2 iteration count (`t_cost`).
    pub iterations: u32,
    /// Argon2 memory cost in KiB (`m_cost`).
    pub memory_kib: u32,
}

impl CipherConfig {
    /// A config with the given passphrase and default cost parameters.
    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with costs clamped to what Argon2 accepts.
    ///
    /// - `iterations` is at least 1.
    /// - `memory_kib` is at least 8 (Argon2's floor for one lane).
    pub fn validated(mut self) -> Self {
        self.iterations = self.iterations.max(1);
        self.memory_kib = self.memory_kib.max(8);
        self
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            passphrase: DEFAULT_PASSPHRASE.to_string(),
            salt: DEFAULT_SALT.to_string(),
            iterations: 3,
            memory_kib: 4096,
        }
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("passphrase", &"<redacted>")
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .field("memory_kib", &self.memory_kib)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One sealed message: the nonce it was sealed with and the ciphertext
/// (including the 16-byte Poly1305 tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// JSON form of an envelope, both fields base64 (standard alphabet).
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    nonce: String,
    ciphertext: String,
}

impl EncryptedEnvelope {
    /// Encodes as `{"nonce": "<base64>", "ciphertext": "<base64>"}`.
    pub fn to_wire(&self) -> String {
        let wire = WireEnvelope {
            nonce: BASE64_STANDARD.encode(self.nonce),
            ciphertext: BASE64_STANDARD.encode(&self.ciphertext),
        };
        // A struct of two strings always serializes.
        serde_json::to_string(&wire).unwrap_or_default()
    }

    /// Parses the JSON wire form.
    ///
    /// # Errors
    /// `CipherError::MalformedEnvelope` if the text is not an envelope,
    /// either field is not base64, or the nonce has the wrong length.
    pub fn from_wire(text: &str) -> Result<Self, CipherError> {
        let wire: WireEnvelope = serde_json::from_str(text)
            .map_err(|e| CipherError::MalformedEnvelope(e.to_string()))?;
        Self::from_parts(&wire)
    }

    fn from_parts(wire: &WireEnvelope) -> Result<Self, CipherError> {
        let nonce_bytes = BASE64_STANDARD
            .decode(wire.nonce.as_bytes())
            .map_err(|e| CipherError::MalformedEnvelope(format!("nonce: {e}")))?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| {
            CipherError::MalformedEnvelope("unexpected nonce length".into())
        })?;
        let ciphertext = BASE64_STANDARD
            .decode(wire.ciphertext.as_bytes())
            .map_err(|e| {
                CipherError::MalformedEnvelope(format!("ciphertext: {e}"))
            })?;
        Ok(Self { nonce, ciphertext })
    }
}

// ---------------------------------------------------------------------------
// Decoding outcome
// ---------------------------------------------------------------------------

/// Result of leniently decoding an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid envelope that authenticated under our key.
    Decrypted(Vec<u8>),
    /// Not an envelope at all. The raw text, as sent by a legacy peer.
    Plaintext(Vec<u8>),
    /// Envelope-shaped but failed to open (wrong key or corruption).
    /// Carries the raw text so it can still be shown.
    Undecryptable(Vec<u8>),
}

impl Decoded {
    /// The bytes to deliver, whatever the outcome.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Decrypted(b) | Self::Plaintext(b) | Self::Undecryptable(b) => b,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        matches!(self, Self::Decrypted(_))
    }
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// A derived deployment key, ready to seal and open messages.
///
/// Derivation is deliberately slow (Argon2id), so derive once at startup
/// and clone the `Cipher` wherever it is needed.
#[derive(Clone)]
pub struct Cipher {
    aead: ChaCha20Poly1305,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Stretches the configured passphrase into the deployment key.
    ///
    /// # Errors
    /// `CipherError::KeyDerivation` if Argon2 rejects the parameters,
    /// most commonly a salt shorter than 8 bytes.
    pub fn derive(config: &CipherConfig) -> Result<Self, CipherError> {
        let config = config.clone().validated();
        let params =
            Params::new(config.memory_kib, config.iterations, 1, Some(KEY_LEN))
                .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = [0u8; KEY_LEN];
        argon
            .hash_password_into(
                config.passphrase.as_bytes(),
                config.salt.as_bytes(),
                &mut key,
            )
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        tracing::debug!(
            iterations = config.iterations,
            memory_kib = config.memory_kib,
            "derived deployment key"
        );
        Ok(Self::from_key(&key))
    }

    /// Builds a cipher from raw key bytes, skipping derivation.
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Seals `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CipherError> {
        let nonce: [u8; NONCE_LEN] = rand::rng().random();
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        Ok(EncryptedEnvelope { nonce, ciphertext })
    }

    /// Opens an envelope.
    ///
    /// # Errors
    /// `CipherError::Decrypt` if the tag does not verify.
    pub fn open(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CipherError> {
        self.aead
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| CipherError::Decrypt)
    }

    /// Seals and encodes to the wire form in one step.
    pub fn encode(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        Ok(self.seal(plaintext)?.to_wire())
    }

    /// Leniently decodes an inbound payload. Never fails.
    pub fn decode(&self, text: &str) -> Decoded {
        let raw = || text.as_bytes().to_vec();

        let Ok(wire) = serde_json::from_str::<WireEnvelope>(text) else {
            return Decoded::Plaintext(raw());
        };
        let opened = EncryptedEnvelope::from_parts(&wire)
            .and_then(|envelope| self.open(&envelope));
        match opened {
            Ok(plaintext) => Decoded::Decrypted(plaintext),
            Err(e) => {
                tracing::debug!(error = %e, "envelope did not open");
                Decoded::Undecryptable(raw())
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    /// Derivation is slow; share one key across tests.
    fn cipher() -> &'static Cipher {
        static CIPHER: OnceLock<Cipher> = OnceLock::new();
        CIPHER.get_or_init(|| Cipher::derive(&CipherConfig::default()).unwrap())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let envelope = cipher().seal(b"hello").unwrap();
        assert_eq!(cipher().open(&envelope).unwrap(), b"hello");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let a = cipher().seal(b"same").unwrap();
        let b = cipher().seal(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_ciphertext_includes_tag() {
        let envelope = cipher().seal(b"").unwrap();
        assert_eq!(envelope.ciphertext.len(), 16);
    }

    #[test]
    fn test_tampered_ciphertext_fails_to_open() {
        let mut envelope = cipher().seal(b"payload").unwrap();
        envelope.ciphertext[0] ^= 0x01;
        assert!(matches!(
            cipher().open(&envelope),
            Err(CipherError::Decrypt)
        ));
    }

    #[test]
    fn test_wire_form_is_base64_json() {
        let envelope = EncryptedEnvelope {
            nonce: [0u8; NONCE_LEN],
            ciphertext: vec![1, 2, 3],
        };
        assert_eq!(
            envelope.to_wire(),
            r#"{"nonce":"AAAAAAAAAAAAAAAA","ciphertext":"AQID"}"#
        );
        assert_eq!(
            EncryptedEnvelope::from_wire(&envelope.to_wire()).unwrap(),
            envelope
        );
    }

    #[test]
    fn test_from_wire_rejects_short_nonce() {
        let err = EncryptedEnvelope::from_wire(r#"{"nonce":"AAAA","ciphertext":"AQID"}"#)
            .unwrap_err();
        assert!(matches!(err, CipherError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_plain_text_is_plaintext() {
        assert_eq!(
            cipher().decode("hi there"),
            Decoded::Plaintext(b"hi there".to_vec())
        );
        // JSON that is not an envelope is also plaintext.
        assert_eq!(
            cipher().decode(r#"{"nonce":"x"}"#),
            Decoded::Plaintext(br#"{"nonce":"x"}"#.to_vec())
        );
    }

    #[test]
    fn test_decode_foreign_key_is_undecryptable() {
        let other = Cipher::from_key(&[7u8; KEY_LEN]);
        let text = other.encode(b"secret").unwrap();
        let decoded = cipher().decode(&text);
        assert_eq!(decoded, Decoded::Undecryptable(text.as_bytes().to_vec()));
        assert!(!decoded.is_decrypted());
    }

    #[test]
    fn test_decode_bad_base64_envelope_is_undecryptable() {
        let text = r#"{"nonce":"!!!","ciphertext":"AQID"}"#;
        assert!(matches!(cipher().decode(text), Decoded::Undecryptable(_)));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let again = Cipher::derive(&CipherConfig::default()).unwrap();
        let envelope = cipher().seal(b"abc").unwrap();
        assert_eq!(again.open(&envelope).unwrap(), b"abc");
    }

    #[test]
    fn test_derive_rejects_short_salt() {
        let config = CipherConfig {
            salt: "short".into(),
            ..CipherConfig::default()
        };
        assert!(matches!(
            Cipher::derive(&config),
            Err(CipherError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_validated_clamps_costs() {
        let config = CipherConfig {
            iterations: 0,
            memory_kib: 0,
            ..CipherConfig::default()
        }
        .validated();
        assert_eq!(config.iterations, 1);
        assert_eq!(config.memory_kib, 8);
    }

    #[test]
    fn test_config_debug_redacts_passphrase() {
        let rendered = format!("{:?}", CipherConfig::with_passphrase("hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

//! Self-describing ciphertext container.
//!
//! The envelope is what actually gets hidden in a carrier, so its serialized
//! form must be byte-stable: fields are always written in declaration order
//! and binary values are standard base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::cipher::{NONCE_SIZE, TAG_SIZE};
use super::keys::KEY_LENGTH;
use super::CryptoError;

/// Identifier of the only suite produced by [`super::encrypt`].
pub const ALGORITHM_X25519_CHACHA20POLY1305: &str = "x25519-hkdf-sha256-chacha20poly1305";

/// Ciphertext plus everything needed to decrypt it with the recipient's private key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CipherEnvelope {
    /// Cipher suite identifier.
    pub algorithm_id: String,
    /// Sender's ephemeral X25519 public key.
    #[serde(with = "b64")]
    pub ephemeral_data: Vec<u8>,
    /// AEAD nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// AEAD ciphertext including the authentication tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl CipherEnvelope {
    /// Serializes to compact JSON.
    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Serializes to compact JSON bytes, the form embedded into carriers.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Parses an envelope from JSON bytes.
    ///
    /// Anything that does not parse is reported as a decryption failure: a
    /// malformed envelope is indistinguishable from a tampered one.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(data)
            .map_err(|e| CryptoError::DecryptionFailed(format!("malformed envelope: {}", e)))
    }

    /// Parses an envelope from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(json.as_bytes())
    }

    /// Size of [`Self::to_bytes`] for a plaintext of `plaintext_len` bytes.
    pub fn encoded_len(plaintext_len: usize) -> usize {
        fn b64(len: usize) -> usize {
            len.div_ceil(3) * 4
        }
        const KEYS: [&str; 4] = ["algorithmId", "ephemeralData", "nonce", "ciphertext"];

        // {"k":"v","k":"v",...}: braces, commas, and five quote/colon bytes per field
        let framing = 2 + (KEYS.len() - 1) + KEYS.iter().map(|k| k.len() + 5).sum::<usize>();
        framing
            + ALGORITHM_X25519_CHACHA20POLY1305.len()
            + b64(KEY_LENGTH)
            + b64(NONCE_SIZE)
            + b64(plaintext_len + TAG_SIZE)
    }

    /// Longest plaintext whose envelope fits in `payload_capacity` bytes.
    pub fn max_plaintext_len(payload_capacity: usize) -> Option<usize> {
        if Self::encoded_len(0) > payload_capacity {
            return None;
        }
        let (mut lo, mut hi) = (0usize, payload_capacity);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if Self::encoded_len(mid) <= payload_capacity {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Some(lo)
    }
}

mod b64 {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

//! Cryptographic operations for stegchat.
//!
//! This module provides:
//! - Key generation and management (X25519)
//! - The [`CipherEnvelope`] container that gets hidden in carriers
//! - Asymmetric encryption (X25519 + HKDF-SHA256 + ChaCha20Poly1305)

pub mod cipher;
pub mod envelope;
pub mod keys;

pub use cipher::{decrypt, decrypt_with_secret, encrypt, NONCE_SIZE, TAG_SIZE};
pub use envelope::{CipherEnvelope, ALGORITHM_X25519_CHACHA20POLY1305};
pub use keys::{
    decode_public_key_pem, decode_secret_key_pem, encode_public_key_pem, encode_secret_key_pem,
    fingerprint, load_public_key, load_secret_key, public_key_from_bytes, secret_key_from_bytes,
    KeyError, KeyPair, KEY_LENGTH,
};

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur while encrypting or decrypting a message.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The public or private key could not be parsed or is unusable.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Wrong key, malformed or tampered envelope.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Plaintext must not be empty")]
    EmptyPlaintext,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Envelope serialization failed: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// Position of this error in the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::InvalidKey(_) => ErrorKind::InvalidKey,
            CryptoError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            CryptoError::EmptyPlaintext => ErrorKind::PreconditionMissing,
            CryptoError::EncryptionFailed(_)
            | CryptoError::KeyDerivationFailed
            | CryptoError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

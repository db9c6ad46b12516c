//! Asymmetric encryption using X25519 key exchange and ChaCha20Poly1305.
//!
//! Each call to [`encrypt`]:
//! 1. Generates an ephemeral X25519 key pair
//! 2. Performs ECDH with the recipient's public key
//! 3. Derives a symmetric key using HKDF-SHA256
//! 4. Encrypts the message with ChaCha20Poly1305 under a fresh random nonce
//!
//! The ephemeral public key is bound into the AEAD tag as associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use super::envelope::{CipherEnvelope, ALGORITHM_X25519_CHACHA20POLY1305};
use super::keys::{public_key_from_bytes, secret_key_from_bytes, KEY_LENGTH};
use super::CryptoError;

/// Nonce size for ChaCha20Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` for the holder of `recipient_public_key`.
///
/// The key is the raw 32-byte X25519 public key. Fails with
/// [`CryptoError::InvalidKey`] if it has the wrong length or is a low-order
/// point, and with [`CryptoError::EmptyPlaintext`] for an empty message.
pub fn encrypt(
    plaintext: &str,
    recipient_public_key: &[u8],
) -> Result<CipherEnvelope, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyPlaintext);
    }

    let recipient = public_key_from_bytes(recipient_public_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient);
    if !shared_secret.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "public key is a low-order point".to_string(),
        ));
    }

    let symmetric_key = derive_key(&shared_secret, &ephemeral_public, &recipient)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&symmetric_key[..])
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext.as_bytes(),
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(CipherEnvelope {
        algorithm_id: ALGORITHM_X25519_CHACHA20POLY1305.to_string(),
        ephemeral_data: ephemeral_public.as_bytes().to_vec(),
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypts an envelope with the local raw 32-byte private key.
///
/// Every failure past key parsing, including a wrong key, a tampered field
/// or non-UTF-8 output, is reported as [`CryptoError::DecryptionFailed`].
pub fn decrypt(envelope: &CipherEnvelope, local_private_key: &[u8]) -> Result<String, CryptoError> {
    let secret = secret_key_from_bytes(local_private_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    decrypt_with_secret(envelope, &secret)
}

/// Same as [`decrypt`] for an already parsed secret key.
pub fn decrypt_with_secret(
    envelope: &CipherEnvelope,
    secret: &StaticSecret,
) -> Result<String, CryptoError> {
    if envelope.algorithm_id != ALGORITHM_X25519_CHACHA20POLY1305 {
        return Err(CryptoError::DecryptionFailed(format!(
            "unsupported algorithm: {}",
            envelope.algorithm_id
        )));
    }
    if envelope.nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed("bad nonce length".to_string()));
    }
    if envelope.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("ciphertext too short".to_string()));
    }

    let ephemeral_bytes: [u8; KEY_LENGTH] = envelope
        .ephemeral_data
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("bad ephemeral key length".to_string()))?;
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let own_public = PublicKey::from(secret);

    let shared_secret = secret.diffie_hellman(&ephemeral_public);
    if !shared_secret.was_contributory() {
        return Err(CryptoError::DecryptionFailed(
            "ephemeral key is a low-order point".to_string(),
        ));
    }

    let symmetric_key = derive_key(&shared_secret, &ephemeral_public, &own_public)?;

    let cipher = ChaCha20Poly1305::new_from_slice(&symmetric_key[..])
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: ephemeral_public.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed("authentication failed".to_string()))?,
    );

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".to_string()))
}

/// HKDF-SHA256 over the ECDH output, salted with both public keys.
fn derive_key(
    shared_secret: &SharedSecret,
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = [0u8; 2 * KEY_LENGTH];
    salt[..KEY_LENGTH].copy_from_slice(ephemeral_public.as_bytes());
    salt[KEY_LENGTH..].copy_from_slice(recipient_public.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(ALGORITHM_X25519_CHACHA20POLY1305.as_bytes(), &mut key[..])
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(key)
}

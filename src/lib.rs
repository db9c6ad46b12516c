//! # Stegchat - encrypted messages hidden in pictures
//!
//! Stegchat encrypts a short text message to a recipient's public key and
//! hides the resulting envelope in the least significant bits of an image,
//! or of a single frame taken from a video.
//!
//! ## Overview
//!
//! - Messages are sealed with X25519 + HKDF-SHA256 + ChaCha20-Poly1305
//! - The sealed envelope is embedded bit by bit into the colour channels
//! - Stego images are always written as PNG; any lossy step destroys the payload
//! - For videos the source file is left untouched: the payload goes into a
//!   separately stored frame, tied to the video by [`stego::FrameMetadata`]
//!
//! ## Security Model
//!
//! - **Only public keys travel**: private keys never leave the device
//! - **Fresh randomness per message**: identical texts give different envelopes
//! - **Authenticated**: a wrong key or a flipped bit fails, never yields garbage
//! - **Hidden, not secret by obscurity**: LSB embedding is detectable by
//!   steganalysis; confidentiality rests on the cipher alone
//!
//! ## Example Usage
//!
//! ```rust
//! use stegchat::crypto::{decrypt, encrypt, CipherEnvelope, KeyPair};
//! use stegchat::stego::{embed, extract, CarrierImage, PixelLayout};
//!
//! let bob = KeyPair::generate();
//!
//! let envelope = encrypt("hello", &bob.public_key_bytes()).unwrap();
//! let payload = envelope.to_bytes().unwrap();
//!
//! let cover = CarrierImage::new(100, 100, PixelLayout::Luma8, vec![128; 100 * 100]).unwrap();
//! let stego = embed(cover, &payload).unwrap().carrier_image;
//!
//! let recovered = CipherEnvelope::from_bytes(&extract(&stego).unwrap()).unwrap();
//! let text = decrypt(&recovered, &bob.secret_key_bytes()[..]).unwrap();
//! assert_eq!(text, "hello");
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: Key pairs, the cipher and the envelope format
//! - [`stego`]: LSB embedding into images and video frames
//! - [`exchange`]: Send and reveal flows over pluggable storage and transport
//! - [`config`]: Exchange settings and the `~/.stegchat` layout
//! - [`error`]: Error categories shared by every module

pub mod config;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod stego;

pub use config::{ExchangeConfig, StegchatPaths};
pub use crypto::{decrypt, encrypt, CipherEnvelope, KeyPair};
pub use error::ErrorKind;
pub use exchange::{Draft, MessageExchange};
pub use stego::{embed, extract, CarrierImage, FrameMetadata, VideoFrameCarrier};

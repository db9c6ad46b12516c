//! Embedding scheme identifiers and the on-pixel header layout.
//!
//! The first byte written into every carrier is the scheme id, so a decoder
//! never has to guess the traversal order. Scheme 1:
//!
//! - one bit per colour channel, in the least significant bit
//! - pixels in row-major order, channels in buffer order (R, G, B or L)
//! - alpha channels are skipped and never modified
//! - bits of each byte are written most significant first
//!
//! Header: `[scheme id: u8][payload length: u32 big-endian]`, 40 bits total.

/// Bit plane used for embedding.
pub const EMBEDDING_MASK: u8 = 0x01;

/// Bits taken by the scheme id.
pub const SCHEME_ID_BITS: usize = 8;

/// Bits taken by the payload length.
pub const LENGTH_BITS: usize = 32;

/// Total header size in bits.
pub const HEADER_BITS: usize = SCHEME_ID_BITS + LENGTH_BITS;

/// Header size in bytes.
pub const HEADER_BYTES: usize = HEADER_BITS / 8;

/// Known embedding schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingScheme {
    /// LSB of each colour channel, row-major traversal.
    Lsb1RowMajor,
}

/// Scheme written by this version of the crate.
pub const CURRENT_SCHEME: EmbeddingScheme = EmbeddingScheme::Lsb1RowMajor;

impl EmbeddingScheme {
    /// Wire identifier.
    pub fn id(self) -> u8 {
        match self {
            EmbeddingScheme::Lsb1RowMajor => 1,
        }
    }

    /// Looks up a scheme by wire identifier.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(EmbeddingScheme::Lsb1RowMajor),
            _ => None,
        }
    }
}

/// Decoded payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub scheme: EmbeddingScheme,
    pub payload_len: u32,
}

impl Header {
    pub fn new(scheme: EmbeddingScheme, payload_len: u32) -> Self {
        Self { scheme, payload_len }
    }

    pub fn to_bytes(self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0u8; HEADER_BYTES];
        bytes[0] = self.scheme.id();
        bytes[1..].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes
    }

    /// Returns `None` when the scheme id is unknown.
    pub fn from_bytes(bytes: [u8; HEADER_BYTES]) -> Option<Self> {
        let scheme = EmbeddingScheme::from_id(bytes[0])?;
        let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Some(Self { scheme, payload_len })
    }

    /// Header plus payload size in bits, `None` if it overflows `usize`.
    pub fn total_bits(self) -> Option<usize> {
        usize::try_from(self.payload_len)
            .ok()?
            .checked_mul(8)?
            .checked_add(HEADER_BITS)
    }
}

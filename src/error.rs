//! Crate-wide error taxonomy.
//!
//! Each module keeps its own error enum; every variant of those enums maps to
//! exactly one [`ErrorKind`] so callers can branch on the category without
//! matching on module-specific details.

use std::fmt;

/// Category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A public or private key could not be parsed.
    InvalidKey,
    /// Wrong key, or the envelope was malformed or tampered with.
    DecryptionFailed,
    /// The payload does not fit in the carrier.
    CapacityExceeded,
    /// The carrier holds no decodable payload.
    NoHiddenData,
    /// A relocated video frame is not the frame that was embedded into.
    FrameMismatch,
    /// External I/O failed. Retryable in principle; never retried here.
    TransportFailure,
    /// A required input is absent: recipient, carrier, plaintext or private key.
    PreconditionMissing,
    /// The carrier file cannot be decoded or has an unsupported pixel layout.
    UnsupportedCarrier,
    /// An invariant of this crate was violated.
    Internal,
}

impl ErrorKind {
    /// Whether repeating the same operation could succeed without changing inputs.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransportFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidKey => "invalid key",
            ErrorKind::DecryptionFailed => "decryption failed",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::NoHiddenData => "no hidden data",
            ErrorKind::FrameMismatch => "frame mismatch",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::PreconditionMissing => "precondition missing",
            ErrorKind::UnsupportedCarrier => "unsupported carrier",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

//! Message exchange between users.
//!
//! The [`MessageExchange`] coordinator ties the cipher and the carriers to
//! the outside world through the traits in [`services`]:
//!
//! ```text
//! send:   Composing -> Encrypting -> Embedding -> Uploading -> Sent
//! reveal: Received -> Revealing -> Revealed
//!                              \-> (failed, back to Received)
//! ```
//!
//! In-memory and file-backed implementations of every collaborator live in
//! [`storage`], [`directory`], [`keystore`] and [`transport`].

pub mod coordinator;
pub mod directory;
pub mod history;
pub mod keystore;
pub mod message;
pub mod services;
pub mod storage;
pub mod transport;

pub use coordinator::{
    CarrierFile, Collaborators, Draft, MessageExchange, RevealState, SendOutcome, SendState,
};
pub use directory::{
    DirectoryEntry, DirectoryError, DirectoryRegistry, FileKeyDirectory, MemoryKeyDirectory,
};
pub use history::{Direction, HistoryEntry, LogEntry, MessageId, MessageLog};
pub use keystore::{FileKeyStore, MemoryKeyStore};
pub use message::{Blob, MediaType, Message, Notification, Upload, UploadReceipt};
pub use services::{BlobStore, Inbox, KeyDirectory, LocalKeyStore, Notifier};
pub use storage::{FsBlobStore, MemoryBlobStore};
pub use transport::{MemoryHub, MemoryInbox, TcpInbox, TcpNotificationListener, TcpNotifier};

use std::fmt;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::ErrorKind;
use crate::stego::StegoError;

/// Input that must be present before a send or reveal can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Recipient,
    Carrier,
    Plaintext,
    RecipientKey(String),
    PrivateKey(String),
    StegoFrame,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Recipient => write!(f, "no recipient selected"),
            Precondition::Carrier => write!(f, "no carrier file chosen"),
            Precondition::Plaintext => write!(f, "message text is empty"),
            Precondition::RecipientKey(user) => write!(f, "no public key for {}", user),
            Precondition::PrivateKey(user) => write!(f, "no private key for {}", user),
            Precondition::StegoFrame => write!(f, "video message has no stego frame"),
        }
    }
}

/// Errors that can occur while sending, receiving or revealing messages.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Precondition missing: {0}")]
    PreconditionMissing(Precondition),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Stego(#[from] StegoError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Transport error: {0}")]
    TransportFailure(String),

    #[error("Notification for {0} delivered to the wrong user")]
    Misdelivered(String),

    #[error("Another message is already being revealed")]
    RevealInProgress,

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Background task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExchangeError {
    /// Position of this error in the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::PreconditionMissing(_)
            | ExchangeError::RevealInProgress
            | ExchangeError::UnknownMessage(_) => ErrorKind::PreconditionMissing,
            ExchangeError::Crypto(e) => e.kind(),
            ExchangeError::Stego(e) => e.kind(),
            ExchangeError::Directory(e) => e.kind(),
            ExchangeError::TransportFailure(_)
            | ExchangeError::Misdelivered(_)
            | ExchangeError::IoError(_) => ErrorKind::TransportFailure,
            ExchangeError::SerializationFailed(_) | ExchangeError::Worker(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn missing(precondition: Precondition) -> Self {
        ExchangeError::PreconditionMissing(precondition)
    }
}

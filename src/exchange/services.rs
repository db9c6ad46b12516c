//! Interfaces to the collaborators outside the core.
//!
//! Everything that touches the network is async. The local key store is
//! synchronous; it reads small files from the local disk at most.

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::message::{Notification, Upload, UploadReceipt};
use super::ExchangeError;

/// Looks up users' public keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Raw 32-byte public key of `user_id`, or `None` if the user is unknown.
    async fn public_key(&self, user_id: &str) -> Result<Option<Vec<u8>>, ExchangeError>;

    /// All known user ids, sorted.
    async fn users(&self) -> Result<Vec<String>, ExchangeError>;
}

/// Stores carriers and stego frames and hands out references to them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, ExchangeError>;

    async fn download(&self, reference: &str) -> Result<Vec<u8>, ExchangeError>;

    /// Releases one upload of `reference`. Stores that hand out the same
    /// reference for repeated uploads keep the blob until every upload of it
    /// has been released.
    async fn delete(&self, reference: &str) -> Result<(), ExchangeError>;
}

/// Delivers notifications to recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), ExchangeError>;
}

/// Stream of notifications addressed to the local user.
#[async_trait]
pub trait Inbox: Send {
    /// Next notification, or `None` once the channel is closed.
    async fn next(&mut self) -> Result<Option<Notification>, ExchangeError>;
}

/// Access to private keys held on this device.
pub trait LocalKeyStore: Send + Sync {
    /// Raw 32-byte private key of `user_id`, or `None` if not present.
    fn private_key(&self, user_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>, ExchangeError>;
}

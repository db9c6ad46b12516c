//! Send and reveal flows.
//!
//! A send runs strictly in order: resolve recipient key, encrypt, embed,
//! upload, notify. Any failure aborts it; nothing reaches the blob store or
//! the history unless every earlier step succeeded, and nothing is retried.
//!
//! Reveals are serialized per coordinator by a single marker. Cipher and
//! carrier work runs on the blocking pool; locks are never held across an
//! await.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use zeroize::Zeroizing;

use crate::config::ExchangeConfig;
use crate::crypto::{decrypt, encrypt, CipherEnvelope};
use crate::stego::{embed, extract, CarrierImage, VideoFrameCarrier};

use super::history::{Direction, HistoryEntry, MessageId, MessageLog};
use super::message::{Blob, MediaType, Message, Notification, Upload};
use super::services::{BlobStore, Inbox, KeyDirectory, LocalKeyStore, Notifier};
use super::{ExchangeError, Precondition};

/// Steps of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Composing,
    Encrypting,
    Embedding,
    Uploading,
    Sent,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendState::Composing => "composing",
            SendState::Encrypting => "encrypting",
            SendState::Embedding => "embedding",
            SendState::Uploading => "uploading",
            SendState::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// Where an incoming message stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Received,
    Revealing,
    Revealed,
}

/// A carrier file picked by the user.
#[derive(Clone)]
pub struct CarrierFile {
    pub file_name: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

impl CarrierFile {
    pub fn image(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: MediaType::Image,
            bytes,
        }
    }

    pub fn video(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: MediaType::Video,
            bytes,
        }
    }
}

impl fmt::Debug for CarrierFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierFile")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// An outgoing message being composed.
#[derive(Default)]
pub struct Draft {
    pub recipient: Option<String>,
    pub plaintext: String,
    pub carrier: Option<CarrierFile>,
}

impl Draft {
    pub fn new(
        recipient: impl Into<String>,
        plaintext: impl Into<String>,
        carrier: CarrierFile,
    ) -> Self {
        Self {
            recipient: Some(recipient.into()),
            plaintext: plaintext.into(),
            carrier: Some(carrier),
        }
    }
}

impl fmt::Debug for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft")
            .field("recipient", &self.recipient)
            .field("plaintext_len", &self.plaintext.len())
            .field("carrier", &self.carrier)
            .finish()
    }
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub id: MessageId,
    pub message: Message,
    pub capacity_used_bits: usize,
    pub capacity_total_bits: usize,
}

/// The external services a coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn KeyDirectory>,
    pub store: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub keys: Arc<dyn LocalKeyStore>,
}

/// Releases the reveal marker when dropped, including on cancellation.
struct RevealGuard<'a> {
    marker: &'a Mutex<Option<MessageId>>,
}

impl Drop for RevealGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.marker.lock() {
            *current = None;
        }
    }
}

/// Per-user coordinator of the send and reveal flows.
pub struct MessageExchange {
    user_id: String,
    services: Collaborators,
    video: VideoFrameCarrier,
    config: ExchangeConfig,
    history: RwLock<MessageLog>,
    revealing: Mutex<Option<MessageId>>,
}

impl fmt::Debug for MessageExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageExchange")
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs cipher or carrier work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, ExchangeError>
where
    F: FnOnce() -> Result<T, ExchangeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ExchangeError::Worker(e.to_string()))?
}

/// Sender side of [`MessageExchange::send`] once the carrier is embedded.
struct Prepared {
    upload: Upload,
    used_bits: usize,
    total_bits: usize,
}

impl MessageExchange {
    pub fn new(
        user_id: impl Into<String>,
        services: Collaborators,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            services,
            video: VideoFrameCarrier::default(),
            config,
            history: RwLock::new(MessageLog::new()),
            revealing: Mutex::new(None),
        }
    }

    /// Replaces the built-in animated image decoder.
    pub fn with_video_carrier(mut self, video: VideoFrameCarrier) -> Self {
        self.video = video;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Other users known to the directory.
    pub async fn contacts(&self) -> Result<Vec<String>, ExchangeError> {
        let users = self.services.directory.users().await?;
        Ok(users.into_iter().filter(|u| u != &self.user_id).collect())
    }

    fn advance(&self, from: SendState, to: SendState) -> SendState {
        tracing::debug!(user = %self.user_id, from = %from, to = %to, "send state");
        to
    }

    /// Encrypts, embeds, uploads and announces a message.
    pub async fn send(&self, draft: Draft) -> Result<SendOutcome, ExchangeError> {
        let recipient = draft.recipient.clone().unwrap_or_default();
        match self.send_inner(draft).await {
            Ok(outcome) => {
                tracing::info!(
                    user = %self.user_id,
                    recipient = %recipient,
                    id = %outcome.id,
                    media = %outcome.message.media_type,
                    "message sent"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(
                    user = %self.user_id,
                    recipient = %recipient,
                    kind = %e.kind(),
                    error = %e,
                    "send aborted"
                );
                Err(e)
            }
        }
    }

    async fn send_inner(&self, draft: Draft) -> Result<SendOutcome, ExchangeError> {
        let state = SendState::Composing;

        let recipient = draft
            .recipient
            .filter(|r| !r.is_empty())
            .ok_or(ExchangeError::missing(Precondition::Recipient))?;
        if draft.plaintext.is_empty() {
            return Err(ExchangeError::missing(Precondition::Plaintext));
        }
        let carrier = draft
            .carrier
            .filter(|c| !c.bytes.is_empty())
            .ok_or(ExchangeError::missing(Precondition::Carrier))?;
        let plaintext = Zeroizing::new(draft.plaintext);

        let public_key = self
            .services
            .directory
            .public_key(&recipient)
            .await?
            .ok_or_else(|| ExchangeError::missing(Precondition::RecipientKey(recipient.clone())))?;

        let state = self.advance(state, SendState::Encrypting);
        let sealed = plaintext.clone();
        let payload = run_blocking(move || {
            let envelope = encrypt(&sealed, &public_key)?;
            Ok(envelope.to_bytes()?)
        })
        .await?;
        tracing::debug!(payload_bytes = payload.len(), "envelope sealed");

        let state = self.advance(state, SendState::Embedding);
        let prepared = self.prepare_upload(carrier, payload).await?;
        tracing::debug!(
            used_bits = prepared.used_bits,
            total_bits = prepared.total_bits,
            "payload embedded"
        );

        let state = self.advance(state, SendState::Uploading);
        let frame = prepared.upload.frame.clone();
        let media_type = if frame.is_some() {
            MediaType::Video
        } else {
            MediaType::Image
        };
        let receipt = self.services.store.upload(prepared.upload).await?;

        let message = Message {
            carrier_ref: receipt.carrier_ref,
            stego_frame_ref: receipt.stego_frame_ref,
            media_type,
            frame,
        };
        let delivered = self
            .services
            .notifier
            .notify(&Notification {
                recipient_id: recipient.clone(),
                message: message.clone(),
            })
            .await;
        if let Err(e) = delivered {
            self.discard_upload(&message).await;
            return Err(e);
        }

        self.advance(state, SendState::Sent);
        let id = {
            let mut history = self.write_history()?;
            let id = history.append(Direction::Sent, &recipient, message.clone());
            history.record_reveal(id, &plaintext);
            id
        };

        Ok(SendOutcome {
            id,
            message,
            capacity_used_bits: prepared.used_bits,
            capacity_total_bits: prepared.total_bits,
        })
    }

    /// Releases the blobs of a message that never reached its recipient.
    async fn discard_upload(&self, message: &Message) {
        let refs = std::iter::once(&message.carrier_ref).chain(&message.stego_frame_ref);
        for reference in refs {
            if let Err(e) = self.services.store.delete(reference).await {
                tracing::warn!(reference = %reference, error = %e, "failed to discard upload");
            }
        }
    }

    async fn prepare_upload(
        &self,
        carrier: CarrierFile,
        payload: Vec<u8>,
    ) -> Result<Prepared, ExchangeError> {
        match carrier.media_type {
            MediaType::Image => {
                let file_name = self.config.image_upload_name.clone();
                run_blocking(move || {
                    let image = CarrierImage::from_bytes(&carrier.bytes)?;
                    let result = embed(image, &payload)?;
                    let png = result.carrier_image.to_png_bytes()?;
                    Ok(Prepared {
                        upload: Upload {
                            carrier: Blob::new(file_name, png),
                            stego_frame: None,
                            frame: None,
                        },
                        used_bits: result.capacity_used_bits,
                        total_bits: result.capacity_total_bits,
                    })
                })
                .await
            }
            MediaType::Video => {
                let video = self.video.clone();
                let selection = self.config.frame_selection;
                let frame_name = self.config.frame_upload_name.clone();
                run_blocking(move || {
                    let (result, metadata) =
                        video.embed_into_frame(&carrier.bytes, &payload, selection)?;
                    let png = result.carrier_image.to_png_bytes()?;
                    Ok(Prepared {
                        upload: Upload {
                            carrier: Blob::new(carrier.file_name, carrier.bytes),
                            stego_frame: Some(Blob::new(frame_name, png)),
                            frame: Some(metadata),
                        },
                        used_bits: result.capacity_used_bits,
                        total_bits: result.capacity_total_bits,
                    })
                })
                .await
            }
        }
    }

    /// Records an incoming notification.
    pub fn receive(&self, notification: Notification) -> Result<MessageId, ExchangeError> {
        if notification.recipient_id != self.user_id {
            tracing::warn!(
                user = %self.user_id,
                recipient = %notification.recipient_id,
                "notification for another user"
            );
            return Err(ExchangeError::Misdelivered(notification.recipient_id));
        }
        let id = self.write_history()?.append(
            Direction::Received,
            &notification.recipient_id,
            notification.message,
        );
        tracing::info!(user = %self.user_id, id = %id, "message received");
        Ok(id)
    }

    /// Drains `inbox` into the history until it closes.
    pub async fn pump<I: Inbox + ?Sized>(&self, inbox: &mut I) -> Result<usize, ExchangeError> {
        let mut received = 0;
        while let Some(notification) = inbox.next().await? {
            match self.receive(notification) {
                Ok(_) => received += 1,
                Err(ExchangeError::Misdelivered(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(received)
    }

    fn begin_reveal(&self, id: MessageId) -> Result<RevealGuard<'_>, ExchangeError> {
        let mut current = self
            .revealing
            .lock()
            .map_err(|_| ExchangeError::Worker("reveal marker poisoned".to_string()))?;
        if current.is_some() {
            return Err(ExchangeError::RevealInProgress);
        }
        *current = Some(id);
        Ok(RevealGuard {
            marker: &self.revealing,
        })
    }

    /// Downloads, extracts and decrypts a message.
    ///
    /// Already revealed messages are answered from the cache.
    pub async fn reveal(&self, id: MessageId) -> Result<String, ExchangeError> {
        let message = {
            let history = self.read_history()?;
            if let Some(text) = history.plaintext(id) {
                return Ok(text.to_string());
            }
            history
                .get(id)
                .map(|entry| entry.message.clone())
                .ok_or(ExchangeError::UnknownMessage(id))?
        };

        let _guard = self.begin_reveal(id)?;
        tracing::debug!(user = %self.user_id, id = %id, "revealing");

        match self.reveal_inner(&message).await {
            Ok(plaintext) => {
                self.write_history()?.record_reveal(id, &plaintext);
                tracing::info!(user = %self.user_id, id = %id, "message revealed");
                Ok(plaintext.to_string())
            }
            Err(e) => {
                tracing::warn!(
                    user = %self.user_id,
                    id = %id,
                    kind = %e.kind(),
                    error = %e,
                    "reveal failed"
                );
                Err(e)
            }
        }
    }

    async fn reveal_inner(&self, message: &Message) -> Result<Zeroizing<String>, ExchangeError> {
        let private_key = self
            .services
            .keys
            .private_key(&self.user_id)?
            .ok_or_else(|| ExchangeError::missing(Precondition::PrivateKey(self.user_id.clone())))?;

        let reference = message
            .payload_ref()
            .ok_or(ExchangeError::missing(Precondition::StegoFrame))?;
        let bytes = self.services.store.download(reference).await?;
        tracing::debug!(
            size = bytes.len(),
            media = %message.media_type,
            "downloaded payload carrier"
        );

        let frame = match (message.media_type, self.config.verify_frame_on_reveal) {
            (MediaType::Video, true) => message.frame.clone(),
            _ => None,
        };

        run_blocking(move || {
            let image = CarrierImage::from_bytes(&bytes)?;
            if let Some(frame) = &frame {
                VideoFrameCarrier::verify_stego_frame(&image, frame)?;
            }
            let payload = extract(&image)?;
            let envelope = CipherEnvelope::from_bytes(&payload)?;
            Ok(Zeroizing::new(decrypt(&envelope, &private_key)?))
        })
        .await
    }

    /// Fetches a message's original carrier, e.g. to save it.
    pub async fn download(&self, carrier_ref: &str) -> Result<Vec<u8>, ExchangeError> {
        self.services.store.download(carrier_ref).await
    }

    pub fn reveal_state(&self, id: MessageId) -> Result<RevealState, ExchangeError> {
        if self.read_history()?.is_revealed(id) {
            return Ok(RevealState::Revealed);
        }
        let current = self
            .revealing
            .lock()
            .map_err(|_| ExchangeError::Worker("reveal marker poisoned".to_string()))?;
        Ok(if *current == Some(id) {
            RevealState::Revealing
        } else {
            RevealState::Received
        })
    }

    /// Every logged message with its plaintext, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, ExchangeError> {
        Ok(self.read_history()?.snapshot())
    }

    fn read_history(&self) -> Result<std::sync::RwLockReadGuard<'_, MessageLog>, ExchangeError> {
        self.history
            .read()
            .map_err(|_| ExchangeError::Worker("history lock poisoned".to_string()))
    }

    fn write_history(&self) -> Result<std::sync::RwLockWriteGuard<'_, MessageLog>, ExchangeError> {
        self.history
            .write()
            .map_err(|_| ExchangeError::Worker("history lock poisoned".to_string()))
    }
}

//! Records exchanged with the storage and notification collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stego::FrameMetadata;

/// Kind of carrier a message travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// A delivered message as the recipient sees it.
///
/// For images `carrier_ref` points at the stego image. For videos it points
/// at the untouched source video and `stego_frame_ref` at the separately
/// stored frame that holds the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub carrier_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stego_frame_ref: Option<String>,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameMetadata>,
}

impl Message {
    pub fn image(carrier_ref: impl Into<String>) -> Self {
        Self {
            carrier_ref: carrier_ref.into(),
            stego_frame_ref: None,
            media_type: MediaType::Image,
            frame: None,
        }
    }

    pub fn video(
        carrier_ref: impl Into<String>,
        stego_frame_ref: impl Into<String>,
        frame: FrameMetadata,
    ) -> Self {
        Self {
            carrier_ref: carrier_ref.into(),
            stego_frame_ref: Some(stego_frame_ref.into()),
            media_type: MediaType::Video,
            frame: Some(frame),
        }
    }

    /// Presentation time of the stego frame, for video messages.
    pub fn frame_timestamp_ms(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.frame_timestamp_ms)
    }

    /// Reference of the artifact that holds the payload.
    pub fn payload_ref(&self) -> Option<&str> {
        match self.media_type {
            MediaType::Image => Some(&self.carrier_ref),
            MediaType::Video => self.stego_frame_ref.as_deref(),
        }
    }
}

/// Delivery event sent to a recipient after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_id: String,
    pub message: Message,
}

impl Notification {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// A named file handed to the blob store.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Everything produced by one send.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Stego image, or the untouched source video.
    pub carrier: Blob,
    /// Stego frame, for video messages.
    pub stego_frame: Option<Blob>,
    pub frame: Option<FrameMetadata>,
}

/// References assigned by the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub carrier_ref: String,
    pub stego_frame_ref: Option<String>,
}

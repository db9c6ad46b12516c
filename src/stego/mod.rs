//! Steganography module for hiding data in pixel carriers.
//!
//! Supports:
//! - Image LSB steganography (PNG output; PNG, BMP, GIF and JPEG input)
//! - Single video frames (animated GIF and APNG containers)

pub mod image;
pub mod scheme;
pub mod video;

pub use self::image::{embed, extract, CarrierImage, EmbedResult, PixelLayout};
pub use self::scheme::{EmbeddingScheme, CURRENT_SCHEME, HEADER_BITS};
pub use self::video::{
    source_video_id, AnimatedImageDecoder, DecodedFrame, FrameLocator, FrameMetadata,
    FrameSelection, VideoDecoder, VideoFrameCarrier,
};

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during image or video-frame steganography.
#[derive(Error, Debug)]
pub enum StegoError {
    #[error("Payload too large: need {needed_bits} bits, carrier holds {capacity_bits}")]
    CapacityExceeded {
        needed_bits: usize,
        capacity_bits: usize,
    },

    #[error("No hidden data found in image")]
    NoHiddenData,

    #[error("Frame mismatch: {0}")]
    FrameMismatch(String),

    #[error("No frame at offset {offset_ms}ms")]
    NoSuchFrame { offset_ms: u64 },

    #[error("Unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("Pixel buffer has {got} bytes, expected {expected}")]
    InvalidDimensions { expected: usize, got: usize },

    #[error("Image load error: {0}")]
    ImageLoad(String),

    #[error("Image save error: {0}")]
    ImageSave(String),

    #[error("Video decode error: {0}")]
    VideoDecode(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StegoError {
    /// Position of this error in the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StegoError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            StegoError::NoHiddenData => ErrorKind::NoHiddenData,
            StegoError::FrameMismatch(_) => ErrorKind::FrameMismatch,
            StegoError::NoSuchFrame { .. } => ErrorKind::PreconditionMissing,
            StegoError::UnsupportedLayout(_)
            | StegoError::InvalidDimensions { .. }
            | StegoError::ImageLoad(_)
            | StegoError::VideoDecode(_) => ErrorKind::UnsupportedCarrier,
            StegoError::ImageSave(_) => ErrorKind::Internal,
            StegoError::IoError(_) => ErrorKind::TransportFailure,
        }
    }
}

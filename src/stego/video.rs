//! Video frames as carriers.
//!
//! A single decoded frame is lifted out of the video, embedded into as a
//! still image and stored next to the original video as its own lossless
//! file. [`FrameMetadata`] is the only link between the two: delivery
//! pipelines routinely transcode video, which would wipe any bits hidden in
//! the video stream itself.
//!
//! Decoding goes through the [`VideoDecoder`] trait. The built-in
//! [`AnimatedImageDecoder`] reads animated GIF and APNG containers.
//!
//! Frame timing follows what players do: a frame with a delay of
//! [`MIN_FRAME_DELAY_MS`] or less (including zero) is shown for
//! [`SHORT_DELAY_REPLACEMENT_MS`]. Frame start times are accumulated exactly
//! and recorded as the first whole millisecond at which the frame is on
//! screen, so selecting [`FrameSelection::Offset`] at a recorded timestamp
//! always returns that same frame.

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, Delay, Frames, ImageFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use super::image::{embed, CarrierImage, EmbedResult, PixelLayout};
use super::StegoError;

/// Delays at or below this many milliseconds are not honoured by players.
pub const MIN_FRAME_DELAY_MS: u32 = 10;

/// Display time used instead of a delay of [`MIN_FRAME_DELAY_MS`] or less.
pub const SHORT_DELAY_REPLACEMENT_MS: u32 = 100;

/// Which frame of a video to use as the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameSelection {
    /// The first decoded frame.
    #[default]
    First,
    /// The frame being shown at `offset_ms` from the start.
    Offset { offset_ms: u64 },
}

impl FrameSelection {
    pub fn at(offset: Duration) -> Self {
        FrameSelection::Offset {
            offset_ms: offset.as_millis() as u64,
        }
    }
}

/// Identifies the frame a stego image was made from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    /// Presentation time of the frame, in milliseconds from the start.
    pub frame_timestamp_ms: u64,
    /// Position of the frame in decode order.
    pub frame_index: u64,
    /// SHA-256 of the source video bytes, hex.
    pub source_video_id: String,
    /// [`CarrierImage::cover_digest`] of the frame.
    pub cover_digest: String,
}

impl FrameMetadata {
    pub fn frame_timestamp(&self) -> Duration {
        Duration::from_millis(self.frame_timestamp_ms)
    }
}

/// How a decoder should pick a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLocator {
    Index(u64),
    Offset(Duration),
}

/// A frame produced by a [`VideoDecoder`].
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub index: u64,
    /// First whole millisecond at which the frame is displayed.
    pub timestamp_ms: u64,
    pub image: CarrierImage,
}

/// Decodes single frames out of a video container.
///
/// Implementations must be deterministic: the same bytes and locator always
/// yield a pixel-identical frame, and `FrameLocator::Offset` at a returned
/// `timestamp_ms` yields the frame that reported it.
pub trait VideoDecoder: Send + Sync {
    fn frame(&self, video: &[u8], locator: FrameLocator) -> Result<DecodedFrame, StegoError>;
}

/// Presentation time in milliseconds as a reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameTime {
    numer: u128,
    denom: u128,
}

impl FrameTime {
    const ZERO: FrameTime = FrameTime { numer: 0, denom: 1 };

    fn new(numer: u128, denom: u128) -> Self {
        let divisor = gcd(numer, denom);
        Self {
            numer: numer / divisor,
            denom: denom / divisor,
        }
    }

    /// How long a frame stays on screen.
    fn display_delay(delay: Delay) -> Self {
        let (numer, denom) = delay.numer_denom_ms();
        let (numer, denom) = (u128::from(numer), u128::from(denom));
        if denom == 0 || numer <= u128::from(MIN_FRAME_DELAY_MS) * denom {
            return Self::new(u128::from(SHORT_DELAY_REPLACEMENT_MS), 1);
        }
        Self::new(numer, denom)
    }

    fn checked_add(self, other: FrameTime) -> Option<FrameTime> {
        let divisor = gcd(self.denom, other.denom);
        let denom = (self.denom / divisor).checked_mul(other.denom)?;
        let numer = self
            .numer
            .checked_mul(denom / self.denom)?
            .checked_add(other.numer.checked_mul(denom / other.denom)?)?;
        Some(Self::new(numer, denom))
    }

    /// Whether `offset` is at or after this time.
    fn reached_by(self, offset: Duration) -> bool {
        offset.as_nanos().saturating_mul(self.denom) >= self.numer.saturating_mul(1_000_000)
    }

    /// Smallest whole millisecond at or after this time.
    fn ceil_ms(self) -> u64 {
        let ms = self.numer / self.denom + u128::from(self.numer % self.denom != 0);
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Decoder for animated GIF and APNG, backed by the `image` crate.
///
/// Frames are composited onto the full canvas and returned as RGBA. A frame
/// covers `[start, start + delay)` in exact time.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnimatedImageDecoder;

impl AnimatedImageDecoder {
    fn frames<'a>(&self, video: &'a [u8]) -> Result<Frames<'a>, StegoError> {
        let format =
            image::guess_format(video).map_err(|e| StegoError::VideoDecode(e.to_string()))?;
        let cursor = Cursor::new(video);
        match format {
            ImageFormat::Gif => {
                let decoder =
                    GifDecoder::new(cursor).map_err(|e| StegoError::VideoDecode(e.to_string()))?;
                Ok(decoder.into_frames())
            }
            ImageFormat::Png => {
                let decoder =
                    PngDecoder::new(cursor).map_err(|e| StegoError::VideoDecode(e.to_string()))?;
                let is_apng = decoder
                    .is_apng()
                    .map_err(|e| StegoError::VideoDecode(e.to_string()))?;
                if !is_apng {
                    return Err(StegoError::VideoDecode("PNG is not animated".to_string()));
                }
                let apng = decoder
                    .apng()
                    .map_err(|e| StegoError::VideoDecode(e.to_string()))?;
                Ok(apng.into_frames())
            }
            other => Err(StegoError::VideoDecode(format!(
                "unsupported video container: {:?}",
                other
            ))),
        }
    }
}

impl VideoDecoder for AnimatedImageDecoder {
    fn frame(&self, video: &[u8], locator: FrameLocator) -> Result<DecodedFrame, StegoError> {
        let mut start = FrameTime::ZERO;

        for (index, frame) in self.frames(video)?.enumerate() {
            let frame = frame.map_err(|e| StegoError::VideoDecode(e.to_string()))?;
            let index = index as u64;
            let end = start
                .checked_add(FrameTime::display_delay(frame.delay()))
                .ok_or_else(|| {
                    StegoError::VideoDecode(format!("frame {} timing overflows", index))
                })?;

            let selected = match locator {
                FrameLocator::Index(wanted) => index == wanted,
                FrameLocator::Offset(offset) => start.reached_by(offset) && !end.reached_by(offset),
            };

            if selected {
                let buffer = frame.into_buffer();
                let (width, height) = buffer.dimensions();
                let image =
                    CarrierImage::new(width, height, PixelLayout::Rgba8, buffer.into_raw())?;
                return Ok(DecodedFrame {
                    index,
                    timestamp_ms: start.ceil_ms(),
                    image,
                });
            }

            start = end;
        }

        match locator {
            FrameLocator::Index(index) => Err(StegoError::FrameMismatch(format!(
                "video has no frame {}",
                index
            ))),
            FrameLocator::Offset(offset) => Err(StegoError::NoSuchFrame {
                offset_ms: offset.as_millis() as u64,
            }),
        }
    }
}

/// Stable identifier of a video: SHA-256 of its bytes, hex.
pub fn source_video_id(video: &[u8]) -> String {
    hex::encode(Sha256::digest(video))
}

/// Extracts, embeds into and relocates single video frames.
#[derive(Clone)]
pub struct VideoFrameCarrier {
    decoder: Arc<dyn VideoDecoder>,
}

impl Default for VideoFrameCarrier {
    fn default() -> Self {
        Self::new(Arc::new(AnimatedImageDecoder))
    }
}

impl std::fmt::Debug for VideoFrameCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrameCarrier").finish_non_exhaustive()
    }
}

impl VideoFrameCarrier {
    pub fn new(decoder: Arc<dyn VideoDecoder>) -> Self {
        Self { decoder }
    }

    /// Pulls one frame out of `video` and describes it.
    pub fn extract_frame(
        &self,
        video: &[u8],
        selection: FrameSelection,
    ) -> Result<(CarrierImage, FrameMetadata), StegoError> {
        let locator = match selection {
            FrameSelection::First => FrameLocator::Index(0),
            FrameSelection::Offset { offset_ms } => {
                FrameLocator::Offset(Duration::from_millis(offset_ms))
            }
        };
        let frame = self.decoder.frame(video, locator)?;

        let metadata = FrameMetadata {
            frame_timestamp_ms: frame.timestamp_ms,
            frame_index: frame.index,
            source_video_id: source_video_id(video),
            cover_digest: frame.image.cover_digest(),
        };

        tracing::debug!(
            frame_index = metadata.frame_index,
            timestamp_ms = metadata.frame_timestamp_ms,
            width = frame.image.width(),
            height = frame.image.height(),
            "extracted video frame"
        );

        Ok((frame.image, metadata))
    }

    /// [`Self::extract_frame`] followed by [`embed`].
    pub fn embed_into_frame(
        &self,
        video: &[u8],
        payload: &[u8],
        selection: FrameSelection,
    ) -> Result<(EmbedResult, FrameMetadata), StegoError> {
        let (frame, metadata) = self.extract_frame(video, selection)?;
        let result = embed(frame, payload)?;
        Ok((result, metadata))
    }

    /// Re-extracts the frame shown at `metadata`'s timestamp in `video`.
    ///
    /// Fails with [`StegoError::FrameMismatch`] unless the video, the frame
    /// found at that timestamp and its contents all agree with the metadata.
    pub fn locate_frame(
        &self,
        video: &[u8],
        metadata: &FrameMetadata,
    ) -> Result<CarrierImage, StegoError> {
        let video_id = source_video_id(video);
        if video_id != metadata.source_video_id {
            return Err(StegoError::FrameMismatch(format!(
                "video {} is not the source video {}",
                video_id, metadata.source_video_id
            )));
        }

        let offset = Duration::from_millis(metadata.frame_timestamp_ms);
        let frame = match self.decoder.frame(video, FrameLocator::Offset(offset)) {
            Ok(frame) => frame,
            Err(StegoError::NoSuchFrame { offset_ms }) => {
                return Err(StegoError::FrameMismatch(format!(
                    "video ends before {}ms",
                    offset_ms
                )))
            }
            Err(e) => return Err(e),
        };

        if frame.index != metadata.frame_index || frame.timestamp_ms != metadata.frame_timestamp_ms
        {
            return Err(StegoError::FrameMismatch(format!(
                "frame at {}ms is #{} starting at {}ms, expected #{} starting at {}ms",
                metadata.frame_timestamp_ms,
                frame.index,
                frame.timestamp_ms,
                metadata.frame_index,
                metadata.frame_timestamp_ms
            )));
        }
        if frame.image.cover_digest() != metadata.cover_digest {
            return Err(StegoError::FrameMismatch(format!(
                "frame {} content differs from the recorded frame",
                frame.index
            )));
        }

        Ok(frame.image)
    }

    /// Checks that a stored stego frame was made from the frame in `metadata`.
    pub fn verify_stego_frame(
        stego_frame: &CarrierImage,
        metadata: &FrameMetadata,
    ) -> Result<(), StegoError> {
        if stego_frame.cover_digest() != metadata.cover_digest {
            return Err(StegoError::FrameMismatch(
                "stego frame does not match the recorded frame".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stego::image::extract;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    /// Builds an animated GIF with `count` distinct frames of `delay_ms` each.
    fn test_video(count: u32, delay_ms: u32) -> Vec<u8> {
        let frames: Vec<Frame> = (0..count)
            .map(|i| {
                let buffer = RgbaImage::from_fn(32, 24, |x, y| {
                    Rgba([
                        ((x * 8 + i * 40) % 256) as u8,
                        ((y * 10) % 256) as u8,
                        ((i * 60) % 256) as u8,
                        255,
                    ])
                });
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
            })
            .collect();

        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.encode_frames(frames).unwrap();
        }
        bytes
    }

    /// Builds an APNG with `count` distinct frames of `delay_num / delay_den` seconds.
    fn test_apng(count: u32, delay_num: u16, delay_den: u16) -> Vec<u8> {
        let (width, height) = (16u32, 12u32);
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_animated(count, 0).unwrap();
            encoder.set_frame_delay(delay_num, delay_den).unwrap();
            let mut writer = encoder.write_header().unwrap();
            for i in 0..count {
                let frame = RgbaImage::from_fn(width, height, |x, y| {
                    Rgba([(x * 16) as u8, (y * 20) as u8, (i * 40) as u8, 255])
                });
                writer.write_image_data(frame.as_raw()).unwrap();
            }
            writer.finish().unwrap();
        }
        bytes
    }

    #[test]
    fn test_extract_first_frame() {
        let video = test_video(3, 100);
        let carrier = VideoFrameCarrier::default();

        let (frame, metadata) = carrier.extract_frame(&video, FrameSelection::First).unwrap();

        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 24);
        assert_eq!(frame.layout(), PixelLayout::Rgba8);
        assert_eq!(metadata.frame_index, 0);
        assert_eq!(metadata.frame_timestamp_ms, 0);
        assert_eq!(metadata.source_video_id, source_video_id(&video));
    }

    #[test]
    fn test_extract_at_offset() {
        let video = test_video(5, 1000);
        let carrier = VideoFrameCarrier::default();

        let (_, metadata) = carrier
            .extract_frame(&video, FrameSelection::at(Duration::from_millis(2500)))
            .unwrap();

        assert_eq!(metadata.frame_index, 2);
        assert_eq!(metadata.frame_timestamp(), Duration::from_secs(2));
    }

    #[test]
    fn test_offset_past_end() {
        let video = test_video(2, 100);
        let carrier = VideoFrameCarrier::default();

        let result = carrier.extract_frame(&video, FrameSelection::at(Duration::from_secs(5)));
        assert!(matches!(result, Err(StegoError::NoSuchFrame { offset_ms: 5000 })));
    }

    #[test]
    fn test_locate_frame_is_pixel_identical() {
        let video = test_video(4, 250);
        let carrier = VideoFrameCarrier::default();

        let (frame, metadata) = carrier
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 600 })
            .unwrap();
        let copy = video.clone();
        let located = carrier.locate_frame(&copy, &metadata).unwrap();

        assert_eq!(located, frame);
    }

    #[test]
    fn test_recorded_timestamp_selects_same_frame_at_30fps() {
        let video = test_apng(6, 1, 30);
        let carrier = VideoFrameCarrier::default();

        for index in 0..6u64 {
            // Any point inside the frame's exact interval [index/30 s, (index+1)/30 s).
            let inside_ms = (index * 1000 + 500) / 30;
            let (frame, metadata) = carrier
                .extract_frame(&video, FrameSelection::Offset { offset_ms: inside_ms })
                .unwrap();
            assert_eq!(metadata.frame_index, index);
            assert_eq!(metadata.frame_timestamp_ms, (index * 1000).div_ceil(30));

            let (again, again_metadata) = carrier
                .extract_frame(
                    &video,
                    FrameSelection::Offset {
                        offset_ms: metadata.frame_timestamp_ms,
                    },
                )
                .unwrap();
            assert_eq!(again_metadata, metadata);
            assert_eq!(again, frame);

            assert_eq!(carrier.locate_frame(&video, &metadata).unwrap(), frame);
        }
    }

    #[test]
    fn test_zero_delay_frames_use_default_duration() {
        let video = test_video(3, 0);
        let carrier = VideoFrameCarrier::default();

        let (_, first) = carrier
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 0 })
            .unwrap();
        assert_eq!(first.frame_index, 0);

        let (_, later) = carrier
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 250 })
            .unwrap();
        assert_eq!(later.frame_index, 2);
        assert_eq!(later.frame_timestamp_ms, 2 * u64::from(SHORT_DELAY_REPLACEMENT_MS));
        carrier.locate_frame(&video, &later).unwrap();

        assert!(matches!(
            carrier.extract_frame(&video, FrameSelection::Offset { offset_ms: 300 }),
            Err(StegoError::NoSuchFrame { offset_ms: 300 })
        ));
    }

    #[test]
    fn test_short_delay_treated_like_zero() {
        let video = test_video(2, 10);
        let (_, metadata) = VideoFrameCarrier::default()
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 150 })
            .unwrap();
        assert_eq!(metadata.frame_index, 1);
        assert_eq!(metadata.frame_timestamp_ms, 100);
    }

    #[test]
    fn test_frame_time_arithmetic() {
        let third = FrameTime::new(1000, 30);
        assert_eq!(third, FrameTime::new(100, 3));
        let two_thirds = third.checked_add(third).unwrap();
        assert_eq!(two_thirds, FrameTime::new(200, 3));
        assert_eq!(two_thirds.ceil_ms(), 67);
        assert_eq!(FrameTime::new(200, 1).ceil_ms(), 200);
        assert!(two_thirds.reached_by(Duration::from_millis(67)));
        assert!(!two_thirds.reached_by(Duration::from_millis(66)));
    }

    #[test]
    fn test_locate_frame_in_other_video_fails() {
        let video = test_video(3, 100);
        let other = test_video(4, 100);
        let carrier = VideoFrameCarrier::default();

        let (_, metadata) = carrier.extract_frame(&video, FrameSelection::First).unwrap();

        assert!(matches!(
            carrier.locate_frame(&other, &metadata),
            Err(StegoError::FrameMismatch(_))
        ));
    }

    #[test]
    fn test_locate_frame_with_wrong_timestamp_fails() {
        let video = test_video(3, 100);
        let carrier = VideoFrameCarrier::default();

        let (_, mut metadata) = carrier
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 150 })
            .unwrap();
        metadata.frame_timestamp_ms += 10;

        assert!(matches!(
            carrier.locate_frame(&video, &metadata),
            Err(StegoError::FrameMismatch(_))
        ));
    }

    #[test]
    fn test_embed_into_frame_roundtrip() {
        let video = test_video(3, 100);
        let carrier = VideoFrameCarrier::default();

        let (result, metadata) = carrier
            .embed_into_frame(&video, b"frame payload", FrameSelection::First)
            .unwrap();
        let stego = result.carrier_image;

        VideoFrameCarrier::verify_stego_frame(&stego, &metadata).unwrap();
        assert_eq!(extract(&stego).unwrap(), b"frame payload");

        let located = carrier.locate_frame(&video, &metadata).unwrap();
        assert!(located.same_cover(&stego));
    }

    #[test]
    fn test_stego_frame_from_other_frame_rejected() {
        let video = test_video(3, 100);
        let carrier = VideoFrameCarrier::default();

        let (_, metadata) = carrier.extract_frame(&video, FrameSelection::First).unwrap();
        let (other_frame, _) = carrier
            .extract_frame(&video, FrameSelection::Offset { offset_ms: 150 })
            .unwrap();

        assert!(matches!(
            VideoFrameCarrier::verify_stego_frame(&other_frame, &metadata),
            Err(StegoError::FrameMismatch(_))
        ));
    }

    #[test]
    fn test_still_png_is_not_a_video() {
        let image = CarrierImage::new(4, 4, PixelLayout::Rgb8, vec![9u8; 48]).unwrap();
        let png = image.to_png_bytes().unwrap();

        let result = VideoFrameCarrier::default().extract_frame(&png, FrameSelection::First);
        assert!(matches!(result, Err(StegoError::VideoDecode(_))));
    }

    #[test]
    fn test_frame_selection_serde() {
        let json = serde_json::to_string(&FrameSelection::Offset { offset_ms: 1500 }).unwrap();
        assert_eq!(json, r#"{"mode":"offset","offset_ms":1500}"#);

        let first: FrameSelection = serde_json::from_str(r#"{"mode":"first"}"#).unwrap();
        assert_eq!(first, FrameSelection::First);
    }
}

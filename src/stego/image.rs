//! LSB (Least Significant Bit) steganography for still images.
//!
//! Hides data in the least significant bit of each colour channel, following
//! the traversal described in [`super::scheme`]. Output is always PNG: any
//! lossy re-encoding between embedding and extraction destroys the payload.

use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

use super::scheme::{Header, CURRENT_SCHEME, EMBEDDING_MASK, HEADER_BITS, HEADER_BYTES};
use super::StegoError;

/// 8-bit pixel layouts accepted as carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Luma8,
    LumaA8,
    Rgb8,
    Rgba8,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Luma8 => 1,
            PixelLayout::LumaA8 => 2,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }

    /// Channels per pixel that carry payload bits (alpha excluded).
    pub fn color_channels(self) -> usize {
        match self {
            PixelLayout::Luma8 | PixelLayout::LumaA8 => 1,
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => 3,
        }
    }

    fn tag(self) -> u8 {
        match self {
            PixelLayout::Luma8 => 1,
            PixelLayout::LumaA8 => 2,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// A decoded still image used as a carrier.
#[derive(Clone, PartialEq, Eq)]
pub struct CarrierImage {
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for CarrierImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl CarrierImage {
    /// Wraps a raw row-major pixel buffer.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        pixels: Vec<u8>,
    ) -> Result<Self, StegoError> {
        let expected = width as usize * height as usize * layout.channels();
        if pixels.len() != expected {
            return Err(StegoError::InvalidDimensions {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            pixels,
        })
    }

    /// Takes ownership of a decoded image. Only 8-bit layouts are accepted so
    /// that the colour depth of the output always matches the input.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self, StegoError> {
        let (width, height) = (image.width(), image.height());
        let (layout, pixels) = match image {
            DynamicImage::ImageLuma8(buf) => (PixelLayout::Luma8, buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (PixelLayout::LumaA8, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (PixelLayout::Rgb8, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (PixelLayout::Rgba8, buf.into_raw()),
            other => {
                return Err(StegoError::UnsupportedLayout(format!("{:?}", other.color())));
            }
        };
        Self::new(width, height, layout, pixels)
    }

    /// Decodes an image file held in memory (PNG, BMP, GIF or JPEG).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StegoError> {
        let format = image::guess_format(bytes).map_err(|e| StegoError::ImageLoad(e.to_string()))?;
        if format == ImageFormat::Jpeg {
            tracing::debug!("carrier source is JPEG; output will be re-encoded losslessly");
        }
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| StegoError::ImageLoad(e.to_string()))?;
        Self::from_dynamic(image)
    }

    /// Decodes an image file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StegoError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Raw row-major pixel buffer.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of payload-carrying channel values, i.e. total capacity in bits.
    pub fn capacity_bits(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.color_channels()
    }

    /// Largest payload, in bytes, that [`embed`] accepts for this image.
    pub fn payload_capacity(&self) -> usize {
        self.capacity_bits().saturating_sub(HEADER_BITS) / 8
    }

    /// SHA-256 over dimensions, layout and pixels with the embedding plane
    /// cleared. Identical for a frame before and after embedding.
    pub fn cover_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_be_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update([self.layout.tag()]);

        let channels = self.layout.channels();
        let color = self.layout.color_channels();
        let masked: Vec<u8> = self
            .pixels
            .iter()
            .enumerate()
            .map(|(i, &v)| if i % channels < color { v & !EMBEDDING_MASK } else { v })
            .collect();
        hasher.update(&masked);

        hex::encode(hasher.finalize())
    }

    /// Whether `other` is this image up to the embedding bit plane.
    pub fn same_cover(&self, other: &CarrierImage) -> bool {
        if self.width != other.width || self.height != other.height || self.layout != other.layout
        {
            return false;
        }
        let channels = self.layout.channels();
        let color = self.layout.color_channels();
        self.pixels
            .iter()
            .zip(&other.pixels)
            .enumerate()
            .all(|(i, (a, b))| {
                let diff = a ^ b;
                if i % channels < color {
                    diff & !EMBEDDING_MASK == 0
                } else {
                    diff == 0
                }
            })
    }

    /// Rebuilds an `image` crate buffer with the same layout.
    pub fn to_dynamic(&self) -> Result<DynamicImage, StegoError> {
        let (w, h, raw) = (self.width, self.height, self.pixels.clone());
        let image = match self.layout {
            PixelLayout::Luma8 => GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
            PixelLayout::LumaA8 => {
                GrayAlphaImage::from_raw(w, h, raw).map(DynamicImage::ImageLumaA8)
            }
            PixelLayout::Rgb8 => RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
            PixelLayout::Rgba8 => RgbaImage::from_raw(w, h, raw).map(DynamicImage::ImageRgba8),
        };
        image.ok_or_else(|| {
            StegoError::ImageSave("pixel buffer does not match dimensions".to_string())
        })
    }

    /// Encodes the image as PNG, the only format stego output is written in.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, StegoError> {
        let mut bytes = Vec::new();
        self.to_dynamic()?
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| StegoError::ImageSave(e.to_string()))?;
        Ok(bytes)
    }

    /// Writes the image to disk as PNG regardless of the path's extension.
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), StegoError> {
        std::fs::write(path, self.to_png_bytes()?)?;
        Ok(())
    }
}

/// Output of [`embed`].
#[derive(Debug, Clone)]
pub struct EmbedResult {
    pub carrier_image: CarrierImage,
    /// Header plus payload bits written.
    pub capacity_used_bits: usize,
    pub capacity_total_bits: usize,
}

/// Hides `payload` in `carrier`.
///
/// Fails with [`StegoError::CapacityExceeded`] instead of truncating. Only the
/// least significant bit of colour channels changes.
pub fn embed(carrier: CarrierImage, payload: &[u8]) -> Result<EmbedResult, StegoError> {
    let capacity_total_bits = carrier.capacity_bits();
    let capacity_used_bits = payload
        .len()
        .checked_mul(8)
        .and_then(|bits| bits.checked_add(HEADER_BITS))
        .unwrap_or(usize::MAX);

    if capacity_used_bits > capacity_total_bits {
        return Err(StegoError::CapacityExceeded {
            needed_bits: capacity_used_bits,
            capacity_bits: capacity_total_bits,
        });
    }
    let payload_len = u32::try_from(payload.len()).map_err(|_| StegoError::CapacityExceeded {
        needed_bits: capacity_used_bits,
        capacity_bits: capacity_total_bits,
    })?;

    let header = Header::new(CURRENT_SCHEME, payload_len).to_bytes();
    let layout = carrier.layout;
    let mut pixels = carrier.pixels;

    let bits = header
        .iter()
        .chain(payload)
        .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1));

    for (bit_index, bit) in bits.enumerate() {
        let slot = channel_slot(layout, bit_index);
        pixels[slot] = (pixels[slot] & !EMBEDDING_MASK) | bit;
    }

    tracing::debug!(
        payload_bytes = payload.len(),
        used_bits = capacity_used_bits,
        total_bits = capacity_total_bits,
        "embedded payload"
    );

    Ok(EmbedResult {
        carrier_image: CarrierImage {
            width: carrier.width,
            height: carrier.height,
            layout,
            pixels,
        },
        capacity_used_bits,
        capacity_total_bits,
    })
}

/// Recovers the payload hidden by [`embed`].
///
/// Fails with [`StegoError::NoHiddenData`] when the header names an unknown
/// scheme or a length the image cannot hold.
pub fn extract(carrier: &CarrierImage) -> Result<Vec<u8>, StegoError> {
    let capacity = carrier.capacity_bits();
    if capacity < HEADER_BITS {
        return Err(StegoError::NoHiddenData);
    }

    let mut header_bytes = [0u8; HEADER_BYTES];
    read_bytes(carrier, 0, &mut header_bytes);
    let header = Header::from_bytes(header_bytes).ok_or(StegoError::NoHiddenData)?;

    match header.total_bits() {
        Some(bits) if bits <= capacity => {}
        _ => return Err(StegoError::NoHiddenData),
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    read_bytes(carrier, HEADER_BITS, &mut payload);
    Ok(payload)
}

/// Index into the pixel buffer of the channel holding bit `bit_index`.
fn channel_slot(layout: PixelLayout, bit_index: usize) -> usize {
    let color = layout.color_channels();
    (bit_index / color) * layout.channels() + bit_index % color
}

/// Fills `out` with bytes read starting at bit `start_bit`.
fn read_bytes(carrier: &CarrierImage, start_bit: usize, out: &mut [u8]) {
    for (byte_index, byte) in out.iter_mut().enumerate() {
        let mut value = 0u8;
        for offset in 0..8 {
            let slot = channel_slot(carrier.layout, start_bit + byte_index * 8 + offset);
            value = (value << 1) | (carrier.pixels[slot] & EMBEDDING_MASK);
        }
        *byte = value;
    }
}

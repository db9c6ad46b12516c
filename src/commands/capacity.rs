//! Capacity command - how much text fits in a carrier.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stegchat::crypto::CipherEnvelope;
use stegchat::stego::{CarrierImage, VideoFrameCarrier, HEADER_BITS};

use super::{CliContext, CommandExecutor};

/// Show the embedding capacity of an image or video frame.
#[derive(Args, Debug)]
pub struct CapacityCommand {
    /// Carrier image, or video with --video
    pub carrier: PathBuf,

    /// Treat the carrier as a video and measure one frame
    #[arg(long)]
    pub video: bool,

    /// Frame offset in milliseconds (video only)
    #[arg(long, requires = "video")]
    pub at_ms: Option<u64>,
}

impl CommandExecutor for CapacityCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        let image = if self.video {
            let video = fs::read(&self.carrier)
                .with_context(|| format!("Failed to read {}", self.carrier.display()))?;
            let (frame, metadata) = VideoFrameCarrier::default()
                .extract_frame(&video, ctx.frame_selection(self.at_ms))
                .context("Failed to extract frame")?;
            println!(
                "Frame:           #{} at {} ms",
                metadata.frame_index, metadata.frame_timestamp_ms
            );
            frame
        } else {
            CarrierImage::from_file(&self.carrier)
                .with_context(|| format!("Failed to load {}", self.carrier.display()))?
        };

        let payload_bytes = image.payload_capacity();
        println!("Dimensions:      {}x{}", image.width(), image.height());
        println!("Pixel layout:    {:?}", image.layout());
        println!("Capacity:        {} bits ({} header)", image.capacity_bits(), HEADER_BITS);
        println!("Max payload:     {} bytes", payload_bytes);
        match CipherEnvelope::max_plaintext_len(payload_bytes) {
            Some(len) => println!("Max message:     {} bytes of UTF-8 text", len),
            None => println!("Max message:     too small for any message"),
        }
        Ok(())
    }
}

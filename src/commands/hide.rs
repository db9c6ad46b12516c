//! Hide command - encrypt a message and embed it into an image or video frame.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use stegchat::crypto::encrypt;
use stegchat::stego::{embed, CarrierImage, EmbedResult, VideoFrameCarrier};

use super::{write_metadata, CliContext, CommandExecutor};

/// Encrypt a message for a recipient and hide it in a carrier.
///
/// The output is always a PNG. For videos the source file is not modified:
/// the payload goes into one extracted frame, and a JSON metadata file is
/// written next to it so the frame can be verified on reveal.
#[derive(Args, Debug)]
pub struct HideCommand {
    /// Carrier image (PNG, BMP, GIF, JPEG), or video with --video
    #[arg(short, long)]
    pub carrier: PathBuf,

    /// Message text
    #[arg(short, long)]
    pub message: String,

    /// Recipient user id or path to their .pub key
    #[arg(short, long)]
    pub to: String,

    /// Output PNG path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Carrier is a video (animated GIF or APNG)
    #[arg(long)]
    pub video: bool,

    /// Use the frame shown at this offset in milliseconds
    #[arg(long, requires = "video")]
    pub at_ms: Option<u64>,

    /// Frame metadata output path (default: <output>.json)
    #[arg(long, requires = "video")]
    pub metadata: Option<PathBuf>,
}

impl CommandExecutor for HideCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        if self.message.is_empty() {
            bail!("Message must not be empty");
        }
        if !self
            .output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        {
            eprintln!("Note: output is PNG-encoded regardless of the file extension.");
        }

        let public_key = ctx.recipient_key(&self.to)?;
        let payload = encrypt(&self.message, &public_key)
            .context("Encryption failed")?
            .to_bytes()?;

        let result = if self.video {
            self.hide_in_video(ctx, &payload)?
        } else {
            let carrier = CarrierImage::from_file(&self.carrier)
                .with_context(|| format!("Failed to load {}", self.carrier.display()))?;
            embed(carrier, &payload).context("Failed to embed message")?
        };

        result
            .carrier_image
            .save_png(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        println!("Message hidden in {}", self.output.display());
        println!(
            "  Capacity used: {} of {} bits ({:.1}%)",
            result.capacity_used_bits,
            result.capacity_total_bits,
            100.0 * result.capacity_used_bits as f64 / result.capacity_total_bits as f64
        );
        Ok(())
    }
}

impl HideCommand {
    fn hide_in_video(&self, ctx: &CliContext, payload: &[u8]) -> Result<EmbedResult> {
        let video = fs::read(&self.carrier)
            .with_context(|| format!("Failed to read {}", self.carrier.display()))?;
        let (result, metadata) = VideoFrameCarrier::default()
            .embed_into_frame(&video, payload, ctx.frame_selection(self.at_ms))
            .context("Failed to embed message into frame")?;

        let metadata_path = self
            .metadata
            .clone()
            .unwrap_or_else(|| self.output.with_extension("json"));
        write_metadata(&metadata_path, &metadata)?;

        println!(
            "Used frame #{} at {} ms; metadata in {}",
            metadata.frame_index,
            metadata.frame_timestamp_ms,
            metadata_path.display()
        );
        Ok(result)
    }
}

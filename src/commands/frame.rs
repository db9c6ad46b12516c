//! Frame command - extract or relocate a single video frame.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stegchat::stego::VideoFrameCarrier;

use super::{read_metadata, write_metadata, CliContext, CommandExecutor};

/// Extract one frame of a video as PNG, or relocate a recorded frame.
#[derive(Args, Debug)]
pub struct FrameCommand {
    /// Video file (animated GIF or APNG)
    pub video: PathBuf,

    /// Output PNG path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Frame offset in milliseconds (default: configured selection)
    #[arg(long, conflicts_with = "locate")]
    pub at_ms: Option<u64>,

    /// Write frame metadata to this path
    #[arg(long, conflicts_with = "locate")]
    pub metadata: Option<PathBuf>,

    /// Relocate the frame described by this metadata file
    #[arg(long)]
    pub locate: Option<PathBuf>,
}

impl CommandExecutor for FrameCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        let video = fs::read(&self.video)
            .with_context(|| format!("Failed to read {}", self.video.display()))?;
        let carrier = VideoFrameCarrier::default();

        let (image, metadata) = match self.locate {
            Some(ref metadata_path) => {
                let metadata = read_metadata(metadata_path)?;
                let image = carrier
                    .locate_frame(&video, &metadata)
                    .context("Frame not found")?;
                (image, metadata)
            }
            None => carrier
                .extract_frame(&video, ctx.frame_selection(self.at_ms))
                .context("Failed to extract frame")?,
        };

        image
            .save_png(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;
        if let Some(ref path) = self.metadata {
            write_metadata(path, &metadata)?;
        }

        println!(
            "Frame #{} at {} ms ({}x{}) written to {}",
            metadata.frame_index,
            metadata.frame_timestamp_ms,
            image.width(),
            image.height(),
            self.output.display()
        );
        println!("  Source video: {}", metadata.source_video_id);
        println!("  Cover digest: {}", metadata.cover_digest);
        Ok(())
    }
}

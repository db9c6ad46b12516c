//! Reveal command - extract and decrypt a hidden message.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use zeroize::Zeroizing;

use stegchat::crypto::{decrypt, load_secret_key, CipherEnvelope};
use stegchat::exchange::services::LocalKeyStore;
use stegchat::exchange::FileKeyStore;
use stegchat::stego::{extract, CarrierImage, VideoFrameCarrier};

use super::{read_metadata, CliContext, CommandExecutor};

/// Extract and decrypt a message from a stego image or stego frame.
#[derive(Args, Debug)]
pub struct RevealCommand {
    /// Stego image or stego frame (PNG)
    pub image: PathBuf,

    /// Path to your private key (.key)
    #[arg(short, long, conflicts_with = "user")]
    pub key: Option<PathBuf>,

    /// Use the private key installed for this user id
    #[arg(short, long)]
    pub user: Option<String>,

    /// Frame metadata written by `hide --video`; verifies the stego frame
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Source video; relocates the frame and checks it against the stego frame
    #[arg(long, requires = "metadata")]
    pub video: Option<PathBuf>,
}

impl CommandExecutor for RevealCommand {
    fn execute(&self, ctx: &CliContext) -> Result<()> {
        let private_key = self.private_key(ctx)?;

        let image = CarrierImage::from_file(&self.image)
            .with_context(|| format!("Failed to load {}", self.image.display()))?;

        if let Some(ref metadata_path) = self.metadata {
            let metadata = read_metadata(metadata_path)?;
            VideoFrameCarrier::verify_stego_frame(&image, &metadata)
                .context("Stego frame does not match its metadata")?;

            if let Some(ref video_path) = self.video {
                let video = fs::read(video_path)
                    .with_context(|| format!("Failed to read {}", video_path.display()))?;
                let located = VideoFrameCarrier::default()
                    .locate_frame(&video, &metadata)
                    .context("Failed to relocate frame in video")?;
                if !located.same_cover(&image) {
                    bail!("Relocated frame differs from the stego frame");
                }
                eprintln!(
                    "Verified frame #{} at {} ms against {}",
                    metadata.frame_index,
                    metadata.frame_timestamp_ms,
                    video_path.display()
                );
            }
        }

        let payload = extract(&image).context("No hidden message found")?;
        let envelope = CipherEnvelope::from_bytes(&payload).context("Decryption failed")?;
        let message = decrypt(&envelope, &private_key[..]).context("Decryption failed")?;

        println!("{}", message);
        Ok(())
    }
}

impl RevealCommand {
    fn private_key(&self, ctx: &CliContext) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(ref path) = self.key {
            let secret = load_secret_key(path)
                .with_context(|| format!("Failed to load private key from {}", path.display()))?;
            return Ok(Zeroizing::new(secret.to_bytes().to_vec()));
        }

        let Some(ref user) = self.user else {
            bail!("Pass --key <path> or --user <id>");
        };
        let store = FileKeyStore::new(ctx.paths.keys_dir());
        store
            .private_key(user)?
            .with_context(|| format!("No private key for '{}' in {}", user, store.dir().display()))
    }
}

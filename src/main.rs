//! Stegchat - encrypted messages hidden in pictures
//!
//! A CLI for hiding X25519-encrypted messages in images and video frames.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stegchat::config::StegchatPaths;

use commands::{
    CapacityCommand, CliContext, CommandExecutor, DirectoryCommand, FrameCommand, HideCommand,
    KeygenCommand, RevealCommand,
};

/// Stegchat - encrypted messages hidden in pictures
///
/// Messages are encrypted to the recipient's public key and embedded in the
/// least significant bits of an image, or of one frame of a video.
#[derive(Parser)]
#[command(name = "stegchat")]
#[command(version)]
#[command(about = "End-to-end encrypted messages hidden in images and video frames")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Stegchat home directory (default: ~/.stegchat)
    #[arg(long, global = true, env = "STEGCHAT_HOME")]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair
    Keygen(KeygenCommand),

    /// Encrypt a message and hide it in an image or video frame
    Hide(HideCommand),

    /// Extract and decrypt a hidden message
    Reveal(RevealCommand),

    /// Show how much a carrier can hold
    Capacity(CapacityCommand),

    /// Extract or relocate a video frame
    Frame(FrameCommand),

    /// Manage known users and their public keys
    Directory(DirectoryCommand),
}

impl Commands {
    fn executor(&self) -> &dyn CommandExecutor {
        match self {
            Commands::Keygen(cmd) => cmd,
            Commands::Hide(cmd) => cmd,
            Commands::Reveal(cmd) => cmd,
            Commands::Capacity(cmd) => cmd,
            Commands::Frame(cmd) => cmd,
            Commands::Directory(cmd) => cmd,
        }
    }
}

/// Installs the fmt subscriber on stderr so command output stays clean.
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("Invalid log level: {}", log_level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    let paths = match cli.home {
        Some(ref home) => StegchatPaths::new(home),
        None => StegchatPaths::from_home()?,
    };
    let ctx = CliContext::load(paths)?;

    cli.command.executor().execute(&ctx)
}

//! Command module - Strategy pattern for CLI commands.
//!
//! Each command is a separate module implementing the `CommandExecutor` trait.
//! Commands share a [`CliContext`] holding the resolved `~/.stegchat` layout
//! and the loaded exchange configuration.

mod capacity;
mod directory;
mod frame;
mod hide;
mod keygen;
mod reveal;

pub use capacity::CapacityCommand;
pub use directory::DirectoryCommand;
pub use frame::FrameCommand;
pub use hide::HideCommand;
pub use keygen::KeygenCommand;
pub use reveal::RevealCommand;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use stegchat::config::{ExchangeConfig, StegchatPaths};
use stegchat::exchange::directory::{resolve_key_path, DirectoryRegistry};
use stegchat::stego::{FrameMetadata, FrameSelection};

/// State shared by every command.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub paths: StegchatPaths,
    pub config: ExchangeConfig,
}

impl CliContext {
    /// Resolves the layout and loads `config.toml` (defaults if absent).
    pub fn load(paths: StegchatPaths) -> Result<Self> {
        let config = paths
            .load_config()
            .with_context(|| format!("Failed to load {}", paths.config_file().display()))?;
        Ok(Self { paths, config })
    }

    pub fn registry(&self) -> Result<DirectoryRegistry> {
        DirectoryRegistry::load(&self.paths.directory_file()).context("Failed to load directory")
    }

    /// Loads a recipient's public key from a user id or a `.pub` path.
    pub fn recipient_key(&self, user_or_path: &str) -> Result<[u8; 32]> {
        let registry = self.registry()?;
        let path = resolve_key_path(&registry, user_or_path)
            .with_context(|| format!("Unknown recipient: {}", user_or_path))?;
        let key = stegchat::crypto::load_public_key(&path)
            .with_context(|| format!("Failed to load public key from {}", path.display()))?;
        Ok(key.to_bytes())
    }

    /// Frame selection, with an explicit offset taking precedence.
    pub fn frame_selection(&self, at_ms: Option<u64>) -> FrameSelection {
        match at_ms {
            Some(offset_ms) => FrameSelection::Offset { offset_ms },
            None => self.config.frame_selection,
        }
    }
}

/// Trait for command execution - Strategy pattern.
///
/// Each command struct holds its parsed arguments and implements
/// this trait to define its execution logic.
pub trait CommandExecutor {
    /// Executes the command with its parsed arguments.
    fn execute(&self, ctx: &CliContext) -> Result<()>;
}

pub(crate) fn write_metadata(path: &Path, metadata: &FrameMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn read_metadata(path: &Path) -> Result<FrameMetadata> {
    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid frame metadata in {}", path.display()))
}

//! Exchange configuration and on-disk layout.
//!
//! Everything lives under `~/.stegchat`:
//!
//! ```text
//! ~/.stegchat/
//!   config.toml      ExchangeConfig
//!   directory.toml   user id -> public key path
//!   keys/<user>.key  local private keys
//!   uploads/         FsBlobStore root
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stego::FrameSelection;

/// Default file name for an uploaded stego image.
pub const DEFAULT_IMAGE_UPLOAD_NAME: &str = "stego-image.png";

/// Default file name for an uploaded stego video frame.
pub const DEFAULT_FRAME_UPLOAD_NAME: &str = "stego-frame.png";

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".stegchat";

/// Errors that can occur while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found. Unable to determine home directory.")]
    NoConfigDir,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

fn default_verify_frame() -> bool {
    true
}

fn default_image_upload_name() -> String {
    DEFAULT_IMAGE_UPLOAD_NAME.to_string()
}

fn default_frame_upload_name() -> String {
    DEFAULT_FRAME_UPLOAD_NAME.to_string()
}

/// Tunables for sending and revealing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Which video frame carries the payload.
    #[serde(default)]
    pub frame_selection: FrameSelection,

    /// Check the downloaded stego frame against the message's frame metadata.
    #[serde(default = "default_verify_frame")]
    pub verify_frame_on_reveal: bool,

    /// File name given to uploaded stego images.
    #[serde(default = "default_image_upload_name")]
    pub image_upload_name: String,

    /// File name given to uploaded stego frames.
    #[serde(default = "default_frame_upload_name")]
    pub frame_upload_name: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            frame_selection: FrameSelection::default(),
            verify_frame_on_reveal: default_verify_frame(),
            image_upload_name: default_image_upload_name(),
            frame_upload_name: default_frame_upload_name(),
        }
    }
}

impl ExchangeConfig {
    /// Same config with a different frame selection.
    pub fn with_frame_selection(mut self, selection: FrameSelection) -> Self {
        self.frame_selection = selection;
        self
    }

    /// Loads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Writes the config, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Resolves the files and directories stegchat uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StegchatPaths {
    root: PathBuf,
}

impl StegchatPaths {
    /// Layout rooted at an explicit directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.stegchat` on Unix, `%USERPROFILE%\.stegchat` on Windows.
    pub fn from_home() -> Result<Self, ConfigError> {
        dirs::home_dir()
            .map(|home| Self::new(home.join(CONFIG_DIR_NAME)))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn directory_file(&self) -> PathBuf {
        self.root.join("directory.toml")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Loads `config.toml` from this layout.
    pub fn load_config(&self) -> Result<ExchangeConfig, ConfigError> {
        ExchangeConfig::load(&self.config_file())
    }
}

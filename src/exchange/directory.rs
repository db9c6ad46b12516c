//! Public key directories.
//!
//! [`FileKeyDirectory`] reads a TOML registry mapping user ids to public key
//! files, normally `~/.stegchat/directory.toml`:
//!
//! ```toml
//! [users.bob]
//! public_key = "/home/alice/keys/bob.pub"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{decode_public_key_pem, CryptoError, KeyError, KEY_LENGTH};
use crate::error::ErrorKind;

use super::services::KeyDirectory;
use super::ExchangeError;

/// Errors that can occur when managing the directory registry.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("User already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::NotFound(_) => ErrorKind::PreconditionMissing,
            DirectoryError::AlreadyExists(_) => ErrorKind::PreconditionMissing,
            DirectoryError::InvalidKeyFile(_) => ErrorKind::InvalidKey,
            DirectoryError::IoError(_) => ErrorKind::TransportFailure,
            DirectoryError::TomlParseError(_) | DirectoryError::TomlSerializeError(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// A registered user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Path to the user's public key (.pub).
    pub public_key: PathBuf,
}

impl DirectoryEntry {
    pub fn new(public_key: PathBuf) -> Self {
        Self { public_key }
    }

    /// Reads and decodes the key file.
    pub fn load_key(&self) -> Result<[u8; KEY_LENGTH], DirectoryError> {
        let pem = fs::read_to_string(&self.public_key)?;
        let key = decode_public_key_pem(&pem).map_err(|e: KeyError| {
            DirectoryError::InvalidKeyFile(format!("{}: {}", self.public_key.display(), e))
        })?;
        Ok(key.to_bytes())
    }
}

/// The registry stored in TOML.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct DirectoryRegistry {
    #[serde(default)]
    pub users: HashMap<String, DirectoryEntry>,
}

impl DirectoryRegistry {
    /// Loads a registry. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves the registry, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), DirectoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Adds a user. Fails if the id is taken.
    pub fn add(&mut self, user_id: &str, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        if self.users.contains_key(user_id) {
            return Err(DirectoryError::AlreadyExists(user_id.to_string()));
        }
        self.users.insert(user_id.to_string(), entry);
        Ok(())
    }

    pub fn upsert(&mut self, user_id: &str, entry: DirectoryEntry) {
        self.users.insert(user_id.to_string(), entry);
    }

    pub fn remove(&mut self, user_id: &str) -> Result<DirectoryEntry, DirectoryError> {
        self.users
            .remove(user_id)
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }

    pub fn get(&self, user_id: &str) -> Option<&DirectoryEntry> {
        self.users.get(user_id)
    }

    /// Users sorted by id.
    pub fn list(&self) -> Vec<(&str, &DirectoryEntry)> {
        let mut users: Vec<_> = self.users.iter().map(|(k, v)| (k.as_str(), v)).collect();
        users.sort_by(|a, b| a.0.cmp(b.0));
        users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Resolves a user id or a key path to a key path.
///
/// Anything that looks like a path (contains `/`, `\` or `.`) is returned
/// as-is; everything else is looked up in the registry.
pub fn resolve_key_path(
    registry: &DirectoryRegistry,
    user_or_path: &str,
) -> Result<PathBuf, DirectoryError> {
    if user_or_path.contains('/') || user_or_path.contains('\\') || user_or_path.contains('.') {
        return Ok(PathBuf::from(user_or_path));
    }
    registry
        .get(user_or_path)
        .map(|entry| entry.public_key.clone())
        .ok_or_else(|| DirectoryError::NotFound(user_or_path.to_string()))
}

/// Directory backed by a TOML registry file. The file is re-read on every
/// lookup so edits made by the CLI are picked up.
#[derive(Debug, Clone)]
pub struct FileKeyDirectory {
    path: PathBuf,
}

impl FileKeyDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn registry(&self) -> Result<DirectoryRegistry, DirectoryError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DirectoryRegistry::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyDirectory for FileKeyDirectory {
    async fn public_key(&self, user_id: &str) -> Result<Option<Vec<u8>>, ExchangeError> {
        let registry = self.registry().await?;
        let Some(entry) = registry.get(user_id) else {
            return Ok(None);
        };
        let pem = tokio::fs::read_to_string(&entry.public_key)
            .await
            .map_err(|e| {
                ExchangeError::TransportFailure(format!(
                    "Failed to read {}: {}",
                    entry.public_key.display(),
                    e
                ))
            })?;
        let key = decode_public_key_pem(&pem)
            .map_err(|e| ExchangeError::Crypto(CryptoError::InvalidKey(e.to_string())))?;
        Ok(Some(key.to_bytes().to_vec()))
    }

    async fn users(&self) -> Result<Vec<String>, ExchangeError> {
        let registry = self.registry().await?;
        Ok(registry.list().into_iter().map(|(id, _)| id.to_string()).collect())
    }
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryKeyDirectory {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a user's public key.
    pub fn register(&self, user_id: &str, public_key: &[u8]) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(user_id.to_string(), public_key.to_vec());
        }
    }

    pub fn unregister(&self, user_id: &str) -> bool {
        self.keys
            .write()
            .map(|mut keys| keys.remove(user_id).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn public_key(&self, user_id: &str) -> Result<Option<Vec<u8>>, ExchangeError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| ExchangeError::Worker("directory lock poisoned".to_string()))?;
        Ok(keys.get(user_id).cloned())
    }

    async fn users(&self) -> Result<Vec<String>, ExchangeError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| ExchangeError::Worker("directory lock poisoned".to_string()))?;
        let mut users: Vec<String> = keys.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

//! Local private key stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use zeroize::Zeroizing;

use crate::crypto::{decode_secret_key_pem, CryptoError};

use super::services::LocalKeyStore;
use super::ExchangeError;

/// Keys held in memory, zeroized on drop.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore").finish_non_exhaustive()
    }
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, private_key: &[u8]) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(user_id.to_string(), Zeroizing::new(private_key.to_vec()));
        }
    }

    pub fn remove(&self, user_id: &str) -> bool {
        self.keys
            .write()
            .map(|mut keys| keys.remove(user_id).is_some())
            .unwrap_or(false)
    }
}

impl LocalKeyStore for MemoryKeyStore {
    fn private_key(&self, user_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>, ExchangeError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| ExchangeError::Worker("key store lock poisoned".to_string()))?;
        Ok(keys.get(user_id).cloned())
    }
}

/// Keys stored as `<dir>/<user>.key` PEM files.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the key file for `user_id`.
    pub fn key_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.key", user_id))
    }
}

impl LocalKeyStore for FileKeyStore {
    fn private_key(&self, user_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>, ExchangeError> {
        if user_id.is_empty() || user_id.contains(['/', '\\']) || user_id.starts_with('.') {
            return Ok(None);
        }

        let path = self.key_path(user_id);
        let pem = match std::fs::read_to_string(&path) {
            Ok(pem) => Zeroizing::new(pem),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let secret = decode_secret_key_pem(&pem)
            .map_err(|e| ExchangeError::Crypto(CryptoError::InvalidKey(e.to_string())))?;
        Ok(Some(Zeroizing::new(secret.to_bytes().to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store() {
        let store = MemoryKeyStore::new();
        assert!(store.private_key("alice").unwrap().is_none());

        store.insert("alice", &[7; 32]);
        assert_eq!(store.private_key("alice").unwrap().unwrap().as_slice(), &[7; 32]);

        assert!(store.remove("alice"));
        assert!(store.private_key("alice").unwrap().is_none());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let alice = KeyPair::generate();
        alice.save_to_files(&dir.path().join("alice")).unwrap();

        let store = FileKeyStore::new(dir.path());
        let key = store.private_key("alice").unwrap().unwrap();
        assert_eq!(key.as_slice(), &alice.secret_key_bytes()[..]);
        assert!(store.private_key("bob").unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_paths() {
        let dir = tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        assert!(store.private_key("../alice").unwrap().is_none());
        assert!(store.private_key("").unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_key() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("alice.key"), "not a key").unwrap();

        let err = FileKeyStore::new(dir.path()).private_key("alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }
}

//! Blob stores for uploaded carriers and stego frames.
//!
//! Both stores are content-addressed: a blob is stored as
//! `<first 16 hex chars of sha256>-<file name>` and referenced as
//! `/uploads/<stored name>`. Uploading the same bytes twice yields the same
//! reference; the stores count uploads per reference so that
//! [`BlobStore::delete`] only removes a blob once nothing refers to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::message::{Blob, Upload, UploadReceipt};
use super::services::BlobStore;
use super::ExchangeError;

/// Prefix of every reference handed out by the stores in this module.
pub const UPLOAD_PREFIX: &str = "/uploads/";

/// Replaces anything outside `[A-Za-z0-9._-]` so names are safe on disk.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "blob".to_string()
    } else {
        trimmed.to_string()
    }
}

fn stored_name(blob: &Blob) -> String {
    let digest = hex::encode(Sha256::digest(&blob.bytes));
    format!("{}-{}", &digest[..16], sanitize_file_name(&blob.file_name))
}

/// Maps a reference back to the stored name, rejecting anything that could
/// escape the upload root.
fn name_from_ref(reference: &str) -> Result<&str, ExchangeError> {
    let name = reference
        .strip_prefix(UPLOAD_PREFIX)
        .ok_or_else(|| {
            ExchangeError::TransportFailure(format!("Unknown reference: {}", reference))
        })?;
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(ExchangeError::TransportFailure(format!(
            "Invalid reference: {}",
            reference
        )));
    }
    Ok(name)
}

fn not_found(reference: &str) -> ExchangeError {
    ExchangeError::TransportFailure(format!("Not found: {}", reference))
}

#[derive(Debug)]
struct StoredBlob {
    bytes: Vec<u8>,
    uploads: usize,
}

/// In-memory store, mainly for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, blob: Blob) -> Result<String, ExchangeError> {
        let name = stored_name(&blob);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| ExchangeError::Worker("blob store lock poisoned".to_string()))?;
        blobs
            .entry(name.clone())
            .or_insert(StoredBlob {
                bytes: blob.bytes,
                uploads: 0,
            })
            .uploads += 1;
        Ok(format!("{}{}", UPLOAD_PREFIX, name))
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, ExchangeError> {
        let carrier_ref = self.put(upload.carrier)?;
        let stego_frame_ref = upload.stego_frame.map(|frame| self.put(frame)).transpose()?;
        Ok(UploadReceipt {
            carrier_ref,
            stego_frame_ref,
        })
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, ExchangeError> {
        let name = name_from_ref(reference)?;
        let blobs = self
            .blobs
            .read()
            .map_err(|_| ExchangeError::Worker("blob store lock poisoned".to_string()))?;
        blobs
            .get(name)
            .map(|stored| stored.bytes.clone())
            .ok_or_else(|| not_found(reference))
    }

    async fn delete(&self, reference: &str) -> Result<(), ExchangeError> {
        let name = name_from_ref(reference)?;
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| ExchangeError::Worker("blob store lock poisoned".to_string()))?;
        let stored = blobs.get_mut(name).ok_or_else(|| not_found(reference))?;
        stored.uploads -= 1;
        if stored.uploads == 0 {
            blobs.remove(name);
            tracing::debug!(name = %name, "removed blob");
        }
        Ok(())
    }
}

/// Store backed by a directory on disk.
///
/// Upload counts live in memory. A file that was already on disk when this
/// store first wrote it counts as one extra upload and is never removed.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    uploads: Arc<Mutex<HashMap<String, usize>>>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uploads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn uploads(&self) -> Result<MutexGuard<'_, HashMap<String, usize>>, ExchangeError> {
        self.uploads
            .lock()
            .map_err(|_| ExchangeError::Worker("blob store lock poisoned".to_string()))
    }

    async fn put(&self, blob: Blob) -> Result<String, ExchangeError> {
        let name = stored_name(&blob);
        let path = self.root.join(&name);
        tokio::fs::create_dir_all(&self.root).await?;
        let known = self.uploads()?.contains_key(&name);
        let preexisting = !known && tokio::fs::try_exists(&path).await?;
        tokio::fs::write(&path, &blob.bytes)
            .await
            .map_err(|e| {
                ExchangeError::TransportFailure(format!("Failed to store {}: {}", name, e))
            })?;
        *self
            .uploads()?
            .entry(name.clone())
            .or_insert(usize::from(preexisting)) += 1;
        tracing::debug!(name = %name, size = blob.bytes.len(), "stored blob");
        Ok(format!("{}{}", UPLOAD_PREFIX, name))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, ExchangeError> {
        let carrier_ref = self.put(upload.carrier).await?;
        let stego_frame_ref = match upload.stego_frame {
            Some(frame) => match self.put(frame).await {
                Ok(reference) => Some(reference),
                Err(e) => {
                    self.delete(&carrier_ref).await?;
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(UploadReceipt {
            carrier_ref,
            stego_frame_ref,
        })
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, ExchangeError> {
        let name = name_from_ref(reference)?;
        tokio::fs::read(self.root.join(name))
            .await
            .map_err(|e| {
                ExchangeError::TransportFailure(format!("Failed to read {}: {}", reference, e))
            })
    }

    async fn delete(&self, reference: &str) -> Result<(), ExchangeError> {
        let name = name_from_ref(reference)?;
        let last = {
            let mut uploads = self.uploads()?;
            let count = uploads.get_mut(name).ok_or_else(|| not_found(reference))?;
            *count -= 1;
            if *count == 0 {
                uploads.remove(name);
                true
            } else {
                false
            }
        };
        if last {
            tokio::fs::remove_file(self.root.join(name))
                .await
                .map_err(|e| {
                    ExchangeError::TransportFailure(format!(
                        "Failed to remove {}: {}",
                        reference, e
                    ))
                })?;
            tracing::debug!(name = %name, "removed blob");
        }
        Ok(())
    }
}

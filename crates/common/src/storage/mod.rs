//! Blob storage for source documents, page rasters and clipping crops
//!
//! Blobs are addressed by a slash-separated key such as
//! `papers/<tenant>/<paper>/pages/page-0001.png`. Records never store keys
//! directly, they store the public reference returned by [`BlobStore::put`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{AppError, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing anything already there.
    /// Returns the public reference for the stored blob.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove one blob; `Ok(false)` when it was not there
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every blob whose key starts with `prefix`; returns how many went
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Public reference under which `key` is served
    fn reference_for(&self, key: &str) -> String;

    /// Inverse of [`BlobStore::reference_for`]; `None` for foreign references
    fn key_for_reference(&self, reference: &str) -> Option<String>;
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Prefix holding every blob of one edition
pub fn paper_prefix(tenant_id: Uuid, paper_id: Uuid) -> String {
    format!("papers/{}/{}/", tenant_id, paper_id)
}

/// Source documents are content-addressed within their edition
pub fn source_document_key(tenant_id: Uuid, paper_id: Uuid, data: &[u8]) -> String {
    format!("{}source-{}.pdf", paper_prefix(tenant_id, paper_id), sha256_hex(data))
}

/// Key for one page raster. `revision` keeps replacements from colliding
/// with the original image (and with each other).
pub fn page_image_key(tenant_id: Uuid, paper_id: Uuid, page_number: u32, revision: &str, ext: &str) -> String {
    format!(
        "{}pages/page-{:04}-{}.{}",
        paper_prefix(tenant_id, paper_id),
        page_number,
        revision,
        ext
    )
}

pub fn clipping_key(clip_id: i64, ext: &str) -> String {
    format!("clippings/{}.{}", clip_id, ext)
}

/// File extension for an upload, preferring the client's file name
pub fn extension_for(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    from_name
        .or_else(|| match content_type {
            Some("image/jpeg") => Some("jpg".to_string()),
            Some(ct) => mime_guess::get_mime_extensions_str(ct)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string()),
            None => None,
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Content type to serve for a key, guessed from its extension
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(AppError::BlobStorage {
            message: format!("invalid blob key: {}", key),
        })
    }
}

fn join_reference(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

fn strip_reference(base: &str, reference: &str) -> Option<String> {
    reference
        .strip_prefix(base.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|key| validate_key(key).is_ok())
        .map(String::from)
}

/// Filesystem-backed store; the gateway serves `root` under `public_base_url`
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        tracing::debug!(key = %key, bytes = data.len(), "Stored blob");
        Ok(self.reference_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }

        // Count files first so callers can log what was removed
        let mut removed = 0;
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                } else {
                    removed += 1;
                }
            }
        }

        tokio::fs::remove_dir_all(&dir).await?;
        Ok(removed)
    }

    fn reference_for(&self, key: &str) -> String {
        join_reference(&self.public_base_url, key)
    }

    fn key_for_reference(&self, reference: &str) -> Option<String> {
        strip_reference(&self.public_base_url, reference)
    }
}

/// Blobs held in process memory
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
    public_base_url: String,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            public_base_url: public_base_url.into(),
        }
    }

    /// Number of stored blobs whose key starts with `prefix`
    pub async fn count(&self, prefix: &str) -> usize {
        self.blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.read().await.get(key).map(|(_, ct)| ct.clone())
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("/files")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        validate_key(key)?;
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(self.reference_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).map(|(data, _)| data.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|k, _| !k.starts_with(prefix));
        Ok(before - blobs.len())
    }

    fn reference_for(&self, key: &str) -> String {
        join_reference(&self.public_base_url, key)
    }

    fn key_for_reference(&self, reference: &str) -> Option<String> {
        strip_reference(&self.public_base_url, reference)
    }
}

//! Durable storage collaborators.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ProvenanceError, Result};

/// Key-value store behind [`ProofStore`](super::ProofStore).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Write `value`, replacing any existing one.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Write `value` only if `key` is absent. Returns whether it was written.
    ///
    /// Must be atomic with respect to other `put_if_absent` calls.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Value for `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ProvenanceError {
    ProvenanceError::storage("memory backend lock poisoned")
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// One file per key under a directory.
///
/// File names are `hex(sha256(key))`, so any key fits the platform's name
/// limit. Each file starts with the key it holds:
///
/// ```text
/// u16 BE key length | key (UTF-8) | value
/// ```
///
/// Writes go to a temporary file first. `put` renames it into place;
/// `put_if_absent` hard-links it, which fails if the target exists.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

const TMP_SUFFIX: &str = ".tmp";

/// Length of a file name: hex SHA-256.
const NAME_LEN: usize = 64;

fn encode_entry(key: &str, value: &[u8]) -> Result<Vec<u8>> {
    let key_len = u16::try_from(key.len())
        .map_err(|_| ProvenanceError::storage(format!("key of {} bytes is too long", key.len())))?;
    let mut out = Vec::with_capacity(2 + key.len() + value.len());
    out.extend_from_slice(&key_len.to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(value);
    Ok(out)
}

/// Split a stored file into its key and value.
fn decode_entry(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let key_len = usize::from(u16::from_be_bytes(bytes.get(..2)?.try_into().ok()?));
    let key = std::str::from_utf8(bytes.get(2..2 + key_len)?).ok()?;
    Some((key, &bytes[2 + key_len..]))
}

impl FilesystemBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Storage`] if the directory cannot be
    /// created.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "FilesystemBackend: opened");
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name(key))
    }

    async fn write_tmp(&self, key: &str, value: &[u8]) -> Result<PathBuf> {
        let tmp = self.root.join(format!(
            "{}.{}{TMP_SUFFIX}",
            Self::file_name(key),
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, encode_entry(key, value)?).await?;
        Ok(tmp)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let tmp = self.write_tmp(key, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path_for(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let tmp = self.write_tmp(key, value).await?;
        let linked = tokio::fs::hard_link(&tmp, self.path_for(key)).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            warn!(path = %tmp.display(), "FilesystemBackend: temp file not removed: {}", e);
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match decode_entry(&bytes) {
            Some((stored, value)) if stored == key => Ok(Some(value.to_vec())),
            _ => Err(ProvenanceError::storage(format!(
                "{} does not hold key {key}",
                path.display()
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let is_entry = name
                .to_str()
                .is_some_and(|n| n.len() == NAME_LEN && n.bytes().all(|b| b.is_ascii_hexdigit()));
            if !is_entry {
                continue;
            }
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                // Deleted since the directory was read.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match decode_entry(&bytes) {
                Some((key, _)) if key.starts_with(prefix) => keys.push(key.to_string()),
                Some(_) => {},
                None => warn!(path = %entry.path().display(), "FilesystemBackend: unreadable entry"),
            }
        }
        Ok(keys)
    }
}

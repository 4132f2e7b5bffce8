//! File-backed key source.
//!
//! Key file format (JSON):
//!
//! ```json
//! {
//!   "algorithm": "ed25519",
//!   "secret_key": "<hex>",
//!   "subject": "provseal signing key",
//!   "not_before": "2026-01-01T00:00:00Z",
//!   "not_after": "2027-01-01T00:00:00Z"
//! }
//! ```
//!
//! Renewal re-reads the file, so operators rotate by dropping a new key
//! file in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use provseal_crypto::{generate_secret, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::KeyringError;
use crate::handle::KeyMaterial;
use crate::source::{KeySource, SourceKind};
use crate::types::{CertificateInfo, KeyContext};

/// On-disk key file.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyFile {
    /// Signature algorithm.
    #[zeroize(skip)]
    pub algorithm: SignatureAlgorithm,
    /// Hex-encoded secret key.
    pub secret_key: String,
    /// Certificate subject.
    pub subject: String,
    /// Start of validity.
    #[zeroize(skip)]
    pub not_before: DateTime<Utc>,
    /// End of validity.
    #[zeroize(skip)]
    pub not_after: DateTime<Utc>,
}

impl KeyFile {
    /// Generate a new key valid from now for `validity`.
    ///
    /// # Errors
    ///
    /// Returns error if the algorithm is unavailable.
    pub fn generate(
        algorithm: SignatureAlgorithm,
        subject: impl Into<String>,
        validity: Duration,
    ) -> Result<Self, KeyringError> {
        let secret = Zeroizing::new(generate_secret(algorithm)?);
        let now = Utc::now();
        Ok(Self {
            algorithm,
            secret_key: hex::encode(secret.as_slice()),
            subject: subject.into(),
            not_before: now,
            not_after: now + validity,
        })
    }

    /// Convert into key material.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is not valid hex or not a valid key.
    pub fn to_material(&self) -> Result<KeyMaterial, KeyringError> {
        let secret = Zeroizing::new(
            hex::decode(self.secret_key.trim())
                .map_err(|e| KeyringError::invalid_key(format!("secret_key is not hex: {e}")))?,
        );
        KeyMaterial::new(
            self.algorithm,
            secret,
            self.subject.clone(),
            self.not_before,
            self.not_after,
        )
    }

    /// Parse a key file from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed.
    pub fn from_json(bytes: &[u8]) -> Result<Self, KeyringError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
        Ok(Zeroizing::new(serde_json::to_vec_pretty(self)?))
    }

    /// Write the key file with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), KeyringError> {
        let json = self.to_json()?;
        tokio::fs::write(path, json.as_slice()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        info!(path = %path.display(), algorithm = %self.algorithm, "KeyFile: written");
        Ok(())
    }
}

/// Key source reading a [`KeyFile`] from disk on every resolution.
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    /// Create a source for the key file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the key file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, context: &KeyContext) -> Result<KeyMaterial, KeyringError> {
        let bytes = Zeroizing::new(tokio::fs::read(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KeyringError::KeyNotFound {
                    key_id: context.key_id.clone(),
                }
            } else {
                KeyringError::Io(e)
            }
        })?);

        let key_file = KeyFile::from_json(&bytes)?;
        let material = key_file.to_material()?;

        debug!(
            key_id = %context.key_id,
            fingerprint = %material.certificate().fingerprint,
            "FileKeySource: resolved key"
        );
        Ok(material)
    }
}

#[async_trait]
impl KeySource for FileKeySource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    async fn resolve_key(&self, context: &KeyContext) -> Result<KeyMaterial, KeyringError> {
        self.load(context).await
    }

    async fn renew(
        &self,
        context: &KeyContext,
        current: &CertificateInfo,
    ) -> Result<KeyMaterial, KeyringError> {
        let material = self.load(context).await?;
        if material.certificate().fingerprint == current.fingerprint {
            return Err(KeyringError::renewal(format!(
                "key file {} still holds the current certificate",
                self.path.display()
            )));
        }
        Ok(material)
    }
}

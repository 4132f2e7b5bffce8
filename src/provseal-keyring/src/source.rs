//! Key source trait.
//!
//! A key source is the collaborator that owns signing key material: a local
//! key file, a remote key-management service, or an in-memory key for
//! development. The certificate manager is the only caller.

use async_trait::async_trait;

use crate::error::KeyringError;
use crate::handle::KeyMaterial;
use crate::types::{CertificateInfo, KeyContext};

/// Where a key source gets its material from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Local key file.
    File,
    /// Remote key-management service unwrapping a sealed key.
    RemoteDecrypt,
    /// In-memory key generated at startup (development only).
    Ephemeral,
}

/// Trait for resolving signing key material.
///
/// ## Security Properties
///
/// - Implementations never log or persist raw secret bytes
/// - Returned material is wrapped in zeroizing buffers
/// - Each call resolves fresh material; the manager does not cache secrets
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Kind of backing store.
    fn kind(&self) -> SourceKind;

    /// Resolve the current key material.
    ///
    /// # Errors
    ///
    /// Returns error if the material cannot be loaded or is malformed.
    async fn resolve_key(&self, context: &KeyContext) -> Result<KeyMaterial, KeyringError>;

    /// Obtain renewed key material to replace `current`.
    ///
    /// The default implementation reports that renewal is unsupported; the
    /// certificate manager then keeps the current certificate active.
    ///
    /// # Errors
    ///
    /// Returns error if renewal fails or is unsupported.
    async fn renew(
        &self,
        context: &KeyContext,
        current: &CertificateInfo,
    ) -> Result<KeyMaterial, KeyringError> {
        let _ = (context, current);
        Err(KeyringError::NotSupported {
            operation: "renew".to_string(),
        })
    }
}

//! Assemble core components from command-line paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use provseal_core::store::{FilesystemBackend, ProofStore, StorageBackend};
use provseal_core::{ProvenanceService, SealConfig};
use provseal_keyring::{CertificateManager, FileKeySource, KeyContext};
use tracing::debug;

/// Configuration from `path`, or defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SealConfig> {
    match path {
        Some(path) => SealConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SealConfig::default()),
    }
}

/// Proof store over a directory, with its index rebuilt.
pub async fn open_store(dir: &Path, config: &SealConfig) -> anyhow::Result<Arc<ProofStore>> {
    let backend: Arc<dyn StorageBackend> = Arc::new(
        FilesystemBackend::open(dir)
            .await
            .with_context(|| format!("opening proof store {}", dir.display()))?,
    );
    let store = Arc::new(ProofStore::new(backend, config));
    let indexed = store.init().await?;
    debug!(indexed, dir = %dir.display(), "proof store ready");
    Ok(store)
}

/// Service signing with the key file at `key`.
pub async fn service(
    key: PathBuf,
    store: Arc<ProofStore>,
    config: SealConfig,
) -> anyhow::Result<ProvenanceService> {
    let context = KeyContext::manifest_signing(key.display().to_string());
    let certificates = Arc::new(CertificateManager::new(
        Arc::new(FileKeySource::new(key)),
        context,
        config.rotation.clone(),
    ));
    let certificate = certificates.init().await.context("loading signing key")?;
    debug!(fingerprint = %certificate.fingerprint, "signing key loaded");

    Ok(ProvenanceService::new(config, certificates, store)?)
}

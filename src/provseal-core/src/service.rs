//! End-to-end operations exposed to a verification layer.
//!
//! ```text
//! sign_and_embed:    bytes ─► ContentKey ─► existing record? ─► re-embed
//!                                   │
//!                                   └─► build ─► seal ─► embed ─► store
//! extract_and_lookup: bytes ─► extract ─► proof id from URI ─► record
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use provseal_keyring::CertificateManager;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::SealConfig;
use crate::embed::{EmbeddingResult, MetadataEmbedder};
use crate::error::{ProvenanceError, Result};
use crate::extract::{ExtractionResult, MetadataExtractor};
use crate::manifest::{Manifest, ManifestBuilder};
use crate::signing::SigningEngine;
use crate::store::{BlockMeanHasher, ContentKey, PerceptualHasher, ProofRecord, ProofStore};
use crate::types::{EmbedStrategy, ImageFormat};

/// Output of [`ProvenanceService::sign_and_embed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedImage {
    /// Image carrying the binding.
    pub signed_bytes: Vec<u8>,
    /// Proof reference written into the image.
    pub proof_uri: String,
    /// `sha256:<hex>` of the sealed manifest JSON.
    pub manifest_hash: String,
    /// Id of the proof record.
    pub proof_id: Uuid,
    /// Embedding strategy used.
    pub strategy: EmbedStrategy,
    /// Image format.
    pub format: ImageFormat,
    /// Whether a new record was created.
    pub was_new: bool,
}

/// Output of [`ProvenanceService::extract_and_lookup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupResult {
    /// What the image carried.
    pub extraction: ExtractionResult,
    /// Stored record for the recovered proof reference, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ProofRecord>,
}

/// Builds, seals, embeds and stores proofs; recovers and resolves them.
pub struct ProvenanceService {
    config: SealConfig,
    builder: ManifestBuilder,
    signer: SigningEngine,
    embedder: MetadataEmbedder,
    extractor: MetadataExtractor,
    store: Arc<ProofStore>,
    hasher: Box<dyn PerceptualHasher>,
}

impl ProvenanceService {
    /// Assemble the service.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Config`] if `config` is inconsistent.
    pub fn new(
        config: SealConfig,
        certificates: Arc<CertificateManager>,
        store: Arc<ProofStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            builder: ManifestBuilder::new(&config),
            signer: SigningEngine::new(certificates),
            embedder: MetadataEmbedder::new(&config),
            extractor: MetadataExtractor::new(&config),
            store,
            hasher: Box::new(BlockMeanHasher),
            config,
        })
    }

    /// Replace the perceptual hasher used for content keys.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Box<dyn PerceptualHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SealConfig {
        &self.config
    }

    /// Proof store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<ProofStore> {
        &self.store
    }

    /// Initialize the certificate and store, then start the rotation
    /// scheduler and the expiry sweeper.
    ///
    /// # Errors
    ///
    /// Returns error if the key source or backend fails, or a background
    /// task is already running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let certificates = self.signer.certificates();
        certificates.init().await?;
        self.store.init().await?;
        certificates.start_rotation_scheduler()?;
        self.store.start_sweeper()?;
        info!(generator = %self.config.generator_id, "ProvenanceService: started");
        Ok(())
    }

    /// Stop background tasks.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
        self.signer.certificates().stop().await;
        info!("ProvenanceService: stopped");
    }

    /// Sign `bytes`, embed the binding and persist the proof.
    ///
    /// Content that already has a live record is re-embedded with that
    /// record's reference and manifest; nothing new is signed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] for bad input,
    /// [`ProvenanceError::Signing`] if no usable key is available, and
    /// storage errors from the backend.
    #[instrument(skip_all, fields(input_len = bytes.len()))]
    pub async fn sign_and_embed<I, K, V>(&self, bytes: &[u8], metadata: I) -> Result<SignedImage>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if bytes.is_empty() {
            return Err(ProvenanceError::validation("image is empty"));
        }
        if !ImageFormat::detect(bytes).is_supported() {
            return Err(ProvenanceError::validation("unsupported image format"));
        }

        let content_key = ContentKey::derive(bytes, self.hasher.as_ref());
        if let Some(existing) = self.store.get(&content_key).await? {
            info!(proof_id = %existing.proof_id, "ProvenanceService: content already sealed");
            return self.embed_record(bytes, &existing, false);
        }

        let manifest = self.builder.build(bytes, metadata)?;
        let manifest = self.signer.seal(manifest).await?;

        let proof_id = Uuid::new_v4();
        let proof_uri = self.config.proof_uri_for(&proof_id);
        let embedded = self.embedder.embed(bytes, &manifest, &proof_uri)?;

        let record = self.record_for(proof_id, proof_uri.clone(), content_key, manifest)?;
        let outcome = self.store.store(record).await?;
        if !outcome.was_new {
            // Lost a concurrent race; carry the winner's binding instead.
            warn!(
                ours = %proof_id,
                winner = %outcome.proof_id,
                "ProvenanceService: concurrent store won by another writer"
            );
            return self.embed_record(bytes, &outcome.record, false);
        }

        Self::signed(embedded, proof_uri, &outcome.record.manifest, proof_id, true)
    }

    /// Extract the binding from `bytes` and resolve it to a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] for empty input and storage
    /// errors from the backend. A missing binding or record is not an error.
    #[instrument(skip_all, fields(input_len = bytes.len()))]
    pub async fn extract_and_lookup(&self, bytes: &[u8]) -> Result<LookupResult> {
        let extraction = self.extractor.extract(bytes)?;

        let proof_id = extraction.proof_uri.as_deref().and_then(proof_id_from_uri);
        let record = match proof_id {
            Some(id) => self.store.get_by_proof_id(&id).await?,
            None => None,
        };
        info!(
            found = extraction.found,
            resolved = record.is_some(),
            "ProvenanceService: lookup finished"
        );
        Ok(LookupResult { extraction, record })
    }

    fn embed_record(&self, bytes: &[u8], record: &ProofRecord, was_new: bool) -> Result<SignedImage> {
        let embedded = self.embedder.embed(bytes, &record.manifest, &record.proof_uri)?;
        Self::signed(
            embedded,
            record.proof_uri.clone(),
            &record.manifest,
            record.proof_id,
            was_new,
        )
    }

    fn signed(
        embedded: EmbeddingResult,
        proof_uri: String,
        manifest: &Manifest,
        proof_id: Uuid,
        was_new: bool,
    ) -> Result<SignedImage> {
        Ok(SignedImage {
            signed_bytes: embedded.modified_bytes,
            proof_uri,
            manifest_hash: manifest.hash()?,
            proof_id,
            strategy: embedded.strategy_used,
            format: embedded.format_used,
            was_new,
        })
    }

    fn record_for(
        &self,
        proof_id: Uuid,
        proof_uri: String,
        content_key: ContentKey,
        manifest: Manifest,
    ) -> Result<ProofRecord> {
        let signature = manifest
            .signature
            .clone()
            .ok_or_else(|| ProvenanceError::signing("sealed manifest has no signature"))?;
        let ttl = chrono::Duration::from_std(self.config.proof_ttl)
            .map_err(|e| ProvenanceError::config(format!("proof_ttl: {e}")))?;
        let created_at: DateTime<Utc> = Utc::now();

        Ok(ProofRecord {
            proof_id,
            proof_uri,
            content_key,
            manifest,
            signature,
            created_at,
            expires_at: created_at + ttl,
        })
    }
}

/// Proof id carried as the last path segment of a proof reference.
#[must_use]
pub fn proof_id_from_uri(uri: &str) -> Option<Uuid> {
    let url = url::Url::parse(uri).ok()?;
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Uuid::parse_str(last).ok()
}

//! Writing a sealed manifest and its proof reference into image bytes.

use tracing::{debug, info, instrument};

use crate::config::SealConfig;
use crate::error::{ProvenanceError, Result};
use crate::formats::{jpeg::MAX_XMP_PACKET, EmbedPayload, FormatRegistry};
use crate::manifest::Manifest;
use crate::proof_uri::validate_proof_uri;
use crate::types::{EmbedStrategy, ImageFormat};
use crate::xmp;

/// Output of [`MetadataEmbedder::embed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingResult {
    /// Image with the binding written in.
    pub modified_bytes: Vec<u8>,
    /// Detected format.
    pub format_used: ImageFormat,
    /// Strategy actually used.
    pub strategy_used: EmbedStrategy,
    /// `modified_bytes.len() - input.len()`.
    pub size_delta: i64,
}

impl EmbeddingResult {
    /// Whether the container path failed and only descriptive metadata was
    /// written.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.strategy_used.is_degraded()
    }
}

/// Embeds sealed manifests into JPEG, PNG and WEBP images.
pub struct MetadataEmbedder {
    formats: FormatRegistry,
    max_manifest_bytes: usize,
    max_proof_uri_len: usize,
}

impl MetadataEmbedder {
    /// Create an embedder from configuration.
    #[must_use]
    pub fn new(config: &SealConfig) -> Self {
        Self {
            formats: FormatRegistry::new(config.jpeg_segment_payload),
            max_manifest_bytes: config.max_manifest_bytes,
            max_proof_uri_len: config.max_proof_uri_len,
        }
    }

    /// Write `manifest` and `proof_uri` into a copy of `image`.
    ///
    /// The proof reference is validated before anything is written. The
    /// input is never modified.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] for empty or unsupported
    /// input, an invalid proof reference, an unsealed or oversized manifest.
    #[instrument(skip_all, fields(input_len = image.len()))]
    pub fn embed(&self, image: &[u8], manifest: &Manifest, proof_uri: &str) -> Result<EmbeddingResult> {
        if image.is_empty() {
            return Err(ProvenanceError::validation("image is empty"));
        }
        validate_proof_uri(proof_uri, self.max_proof_uri_len)?;

        let format = ImageFormat::detect(image);
        let container = self
            .formats
            .container_for(format)
            .ok_or_else(|| ProvenanceError::validation("unsupported image format"))?;

        if !manifest.is_sealed() {
            return Err(ProvenanceError::validation("manifest is not sealed"));
        }
        let manifest_json = manifest.to_json()?;
        if manifest_json.len() > self.max_manifest_bytes {
            return Err(ProvenanceError::validation(format!(
                "manifest of {} bytes exceeds {}",
                manifest_json.len(),
                self.max_manifest_bytes
            )));
        }

        let xmp_packet = xmp::build_packet(proof_uri, Some(&manifest_json), MAX_XMP_PACKET)?;
        debug!(
            format = %format,
            manifest_len = manifest_json.len(),
            xmp_len = xmp_packet.len(),
            "Embedder: writing binding"
        );

        let embedded = container.embed(
            image,
            &EmbedPayload {
                proof_uri,
                manifest_json: &manifest_json,
                xmp_packet: &xmp_packet,
            },
        )?;

        let size_delta = embedded.bytes.len() as i64 - image.len() as i64;
        info!(
            format = %format,
            strategy = %embedded.strategy,
            size_delta,
            "Embedder: binding written"
        );

        Ok(EmbeddingResult {
            modified_bytes: embedded.bytes,
            format_used: format,
            strategy_used: embedded.strategy,
            size_delta,
        })
    }
}

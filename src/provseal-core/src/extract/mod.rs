//! Recovering a proof reference and manifest from image bytes.
//!
//! Strategies run in a fixed order, cheapest-to-trust first:
//!
//! | # | Strategy             | Formats | Confidence        |
//! |---|----------------------|---------|-------------------|
//! | 1 | container boxes      | JPEG    | high              |
//! | 2 | descriptive (XMP)    | all     | medium            |
//! | 3 | auxiliary (EXIF)     | all     | medium            |
//! | 4 | format chunks        | PNG     | high / medium     |
//! | 5 | partial recovery     | all     | low               |
//!
//! The first result at or above the configured minimum confidence wins.
//! Otherwise the best result seen is returned, earliest first on ties.
//! Strategy failures are never errors.

mod strategies;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::SealConfig;
use crate::error::{ProvenanceError, Result};
use crate::formats::{FormatRegistry, MetadataSegments};
use crate::manifest::Manifest;
use crate::proof_uri::validate_proof_uri;
use crate::types::{Confidence, ExtractionStrategyKind, ImageFormat};

pub use strategies::{
    AuxiliaryMetadataStrategy, ContainerBoxStrategy, DescriptiveMetadataStrategy,
    FormatChunksStrategy, PartialRecoveryStrategy,
};

/// Everything a strategy may look at.
#[derive(Debug)]
pub struct ExtractionInput<'a> {
    /// Raw image bytes.
    pub bytes: &'a [u8],
    /// Sniffed format.
    pub format: ImageFormat,
    /// Segments collected by the format's container.
    pub segments: MetadataSegments,
    max_proof_uri_len: usize,
}

impl<'a> ExtractionInput<'a> {
    /// Input with segments read through `formats`.
    #[must_use]
    pub fn read(bytes: &'a [u8], formats: &FormatRegistry, max_proof_uri_len: usize) -> Self {
        let format = ImageFormat::detect(bytes);
        let segments = formats
            .container_for(format)
            .map(|c| c.read_segments(bytes))
            .unwrap_or_default();
        Self {
            bytes,
            format,
            segments,
            max_proof_uri_len,
        }
    }

    /// `candidate` if it passes proof-reference validation.
    #[must_use]
    pub fn accept_uri(&self, candidate: &str) -> Option<String> {
        match validate_proof_uri(candidate, self.max_proof_uri_len) {
            Ok(_) => Some(candidate.to_string()),
            Err(e) => {
                debug!("Extractor: discarding recovered reference: {}", e);
                None
            },
        }
    }
}

/// A binding recovered by one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    /// Validated proof reference.
    pub proof_uri: String,
    /// Manifest, if one was recovered and parsed.
    pub manifest: Option<Manifest>,
    /// Strength of the recovery.
    pub confidence: Confidence,
}

/// One way of recovering a binding.
pub trait ExtractionStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> ExtractionStrategyKind;

    /// Whether the strategy can say anything about `format`.
    fn applies_to(&self, format: ImageFormat) -> bool;

    /// Try to recover a binding. Never panics on malformed input.
    fn attempt(&self, input: &ExtractionInput<'_>) -> Option<Recovered>;
}

/// Output of [`MetadataExtractor::extract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    /// Whether any strategy succeeded.
    pub found: bool,
    /// Recovered proof reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_uri: Option<String>,
    /// Recovered manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    /// Confidence of the winning strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Winning strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<ExtractionStrategyKind>,
    /// Confidence below high.
    pub degraded: bool,
    /// Sniffed format.
    pub format: ImageFormat,
}

impl ExtractionResult {
    fn not_found(format: ImageFormat) -> Self {
        Self {
            found: false,
            proof_uri: None,
            manifest: None,
            confidence: None,
            strategy_used: None,
            degraded: false,
            format,
        }
    }

    fn from_recovered(kind: ExtractionStrategyKind, recovered: Recovered, format: ImageFormat) -> Self {
        Self {
            found: true,
            proof_uri: Some(recovered.proof_uri),
            manifest: recovered.manifest,
            confidence: Some(recovered.confidence),
            strategy_used: Some(kind),
            degraded: recovered.confidence < Confidence::High,
            format,
        }
    }
}

/// Runs the strategy chain.
pub struct MetadataExtractor {
    formats: FormatRegistry,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_confidence: Confidence,
    max_proof_uri_len: usize,
}

impl MetadataExtractor {
    /// Extractor with the standard strategy chain.
    #[must_use]
    pub fn new(config: &SealConfig) -> Self {
        Self::with_strategies(
            config,
            vec![
                Box::new(ContainerBoxStrategy),
                Box::new(DescriptiveMetadataStrategy),
                Box::new(AuxiliaryMetadataStrategy),
                Box::new(FormatChunksStrategy),
                Box::new(PartialRecoveryStrategy),
            ],
        )
    }

    /// Extractor with a custom chain, run in the given order.
    #[must_use]
    pub fn with_strategies(config: &SealConfig, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self {
            formats: FormatRegistry::new(config.jpeg_segment_payload),
            strategies,
            min_confidence: config.min_extraction_confidence,
            max_proof_uri_len: config.max_proof_uri_len,
        }
    }

    /// Recover the binding from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] only for empty input. Any
    /// other input, however malformed, yields `found: false` at worst.
    #[instrument(skip_all, fields(input_len = bytes.len()))]
    pub fn extract(&self, bytes: &[u8]) -> Result<ExtractionResult> {
        if bytes.is_empty() {
            return Err(ProvenanceError::validation("image is empty"));
        }

        let input = ExtractionInput::read(bytes, &self.formats, self.max_proof_uri_len);
        if input.segments.malformed {
            debug!(format = %input.format, "Extractor: structure damaged, continuing");
        }

        let mut best: Option<(ExtractionStrategyKind, Recovered)> = None;
        for strategy in &self.strategies {
            if !strategy.applies_to(input.format) {
                continue;
            }
            let Some(recovered) = strategy.attempt(&input) else {
                debug!(strategy = %strategy.kind(), "Extractor: strategy missed");
                continue;
            };
            debug!(
                strategy = %strategy.kind(),
                confidence = %recovered.confidence,
                "Extractor: strategy recovered binding"
            );

            if recovered.confidence >= self.min_confidence {
                best = Some((strategy.kind(), recovered));
                break;
            }
            if best
                .as_ref()
                .map_or(true, |(_, b)| recovered.confidence > b.confidence)
            {
                best = Some((strategy.kind(), recovered));
            }
        }

        let result = match best {
            Some((kind, recovered)) => ExtractionResult::from_recovered(kind, recovered, input.format),
            None => ExtractionResult::not_found(input.format),
        };
        info!(
            found = result.found,
            format = %result.format,
            strategy = ?result.strategy_used,
            degraded = result.degraded,
            "Extractor: done"
        );
        Ok(result)
    }
}

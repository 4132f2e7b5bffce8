//! Configuration for sealing, embedding, extraction and storage.

use std::path::Path;
use std::time::Duration;

use provseal_keyring::{duration_secs, RotationConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ProvenanceError, Result};
use crate::formats::jpeg::MAX_APP11_SEGMENT_DATA;
use crate::proof_uri::{validate_proof_uri, DEFAULT_MAX_PROOF_URI_LEN};
use crate::types::Confidence;

/// Configuration for provseal.
///
/// Every field has a default; JSON overrides may name any subset.
/// Durations are whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Recorded as the manifest's `generator_id`.
    pub generator_id: String,
    /// Proof references are `<proof_base_url>/<proof_id>`.
    pub proof_base_url: String,
    /// Largest image accepted for signing.
    pub max_content_bytes: usize,
    /// Largest serialized manifest.
    pub max_manifest_bytes: usize,
    /// Largest total serialized size of all assertions.
    pub max_assertion_bytes: usize,
    /// Most assertions per manifest.
    pub max_assertions: usize,
    /// Assertion values are cut to this many characters after sanitizing.
    pub max_assertion_value_chars: usize,
    /// How far in the future `created_at` may be.
    #[serde(with = "duration_secs")]
    pub max_clock_skew: Duration,
    /// How far in the past `created_at` may be.
    #[serde(with = "duration_secs")]
    pub max_staleness: Duration,
    /// Longest accepted proof reference.
    pub max_proof_uri_len: usize,
    /// Largest fragment (index + total + slice) per JPEG APP11 segment.
    pub jpeg_segment_payload: usize,
    /// Lifetime of a stored proof record.
    #[serde(with = "duration_secs")]
    pub proof_ttl: Duration,
    /// Proof records held in memory.
    pub cache_capacity: usize,
    /// Lifetime of an in-memory cache entry.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    /// Period of the expiry sweep.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Extraction stops at the first result at or above this.
    pub min_extraction_confidence: Confidence,
    /// Certificate rotation schedule.
    pub rotation: RotationConfig,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            generator_id: format!("provseal/{}", env!("CARGO_PKG_VERSION")),
            proof_base_url: "https://proofs.provseal.dev/p".into(),
            max_content_bytes: 50 * 1024 * 1024,
            max_manifest_bytes: 256 * 1024,
            max_assertion_bytes: 32 * 1024,
            max_assertions: 64,
            max_assertion_value_chars: 2048,
            max_clock_skew: Duration::from_secs(5 * 60),
            max_staleness: Duration::from_secs(60 * 60),
            max_proof_uri_len: DEFAULT_MAX_PROOF_URI_LEN,
            jpeg_segment_payload: 64 * 1024 - 256,
            proof_ttl: Duration::from_secs(365 * 24 * 60 * 60), // 1 year
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60 * 60),
            min_extraction_confidence: Confidence::High,
            rotation: RotationConfig::default(),
        }
    }
}

impl SealConfig {
    /// Load overrides from a JSON file and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or fails
    /// [`Self::validate`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProvenanceError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ProvenanceError::config(format!("invalid {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| ProvenanceError::config(format!("{name} must be non-zero"));

        if self.generator_id.trim().is_empty() {
            return Err(ProvenanceError::config("generator_id must not be empty"));
        }
        if self.max_content_bytes == 0 {
            return Err(zero("max_content_bytes"));
        }
        if self.max_manifest_bytes == 0 {
            return Err(zero("max_manifest_bytes"));
        }
        if self.max_assertion_bytes > self.max_manifest_bytes {
            return Err(ProvenanceError::config(
                "max_assertion_bytes must not exceed max_manifest_bytes",
            ));
        }
        if self.max_assertion_value_chars == 0 {
            return Err(zero("max_assertion_value_chars"));
        }
        if self.proof_ttl.is_zero() {
            return Err(zero("proof_ttl"));
        }
        if self.cache_ttl.is_zero() {
            return Err(zero("cache_ttl"));
        }
        if self.sweep_interval.is_zero() {
            return Err(zero("sweep_interval"));
        }
        if self.rotation.check_interval.is_zero() {
            return Err(zero("rotation.check_interval"));
        }
        if self.jpeg_segment_payload <= crate::codec::fragment::SEGMENT_HEADER_LEN
            || self.jpeg_segment_payload > MAX_APP11_SEGMENT_DATA
        {
            return Err(ProvenanceError::config(format!(
                "jpeg_segment_payload must be in {}..={MAX_APP11_SEGMENT_DATA}",
                crate::codec::fragment::SEGMENT_HEADER_LEN + 1
            )));
        }

        // Leave room for "/<uuid>".
        validate_proof_uri(&self.proof_base_url, self.max_proof_uri_len.saturating_sub(37))
            .map_err(|e| ProvenanceError::config(format!("proof_base_url: {e}")))?;
        Ok(())
    }

    /// Proof reference for a proof id.
    #[must_use]
    pub fn proof_uri_for(&self, proof_id: &uuid::Uuid) -> String {
        format!("{}/{}", self.proof_base_url.trim_end_matches('/'), proof_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SealConfig::default();
        config.validate().unwrap();
        assert_eq!(config.min_extraction_confidence, Confidence::High);
        assert!(config.generator_id.starts_with("provseal/"));
    }

    #[test]
    fn test_partial_json_overrides() {
        let config: SealConfig = serde_json::from_str(
            r#"{"proof_ttl": 60, "cache_capacity": 5, "rotation": {"renew_before": 120}}"#,
        )
        .unwrap();
        assert_eq!(config.proof_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_capacity, 5);
        assert_eq!(config.rotation.renew_before, Duration::from_secs(120));
        assert_eq!(config.max_assertions, SealConfig::default().max_assertions);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = SealConfig {
            proof_ttl: Duration::ZERO,
            ..SealConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SealConfig {
            proof_base_url: "http://proofs.example.com".into(),
            ..SealConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SealConfig {
            jpeg_segment_payload: 70_000,
            ..SealConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seal.json");
        std::fs::write(&path, r#"{"generator_id": "studio-signer/2.1"}"#).unwrap();
        let config = SealConfig::from_json_file(&path).unwrap();
        assert_eq!(config.generator_id, "studio-signer/2.1");

        std::fs::write(&path, r#"{"sweep_interval": 0}"#).unwrap();
        assert!(SealConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn test_proof_uri_for() {
        let config = SealConfig {
            proof_base_url: "https://proofs.example.com/p/".into(),
            ..SealConfig::default()
        };
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.proof_uri_for(&id),
            "https://proofs.example.com/p/00000000-0000-0000-0000-000000000000"
        );
    }
}

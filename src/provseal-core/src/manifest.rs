//! Provenance manifests and the builder that assembles them.
//!
//! A manifest binds a set of assertions to a content hash. It is signed over
//! a canonical encoding:
//!
//! ```text
//! JSON({domain, generator_id, instance_id, created_at, assertions,
//!       content_hash, signature_algorithm, certificate_ref})
//! ```
//!
//! Field order is fixed by the struct declaration, `created_at` is rendered
//! with microsecond precision, and the signature itself is excluded.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use provseal_crypto::SignatureAlgorithm;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::config::SealConfig;
use crate::error::{ProvenanceError, Result};

/// Domain separator for canonical manifest bytes.
pub const MANIFEST_DOMAIN: &str = "provseal.manifest.v1";

/// Prefix of content hashes.
pub const CONTENT_HASH_PREFIX: &str = "sha256:";

/// Room reserved for signature, algorithm and certificate reference when
/// checking the serialized size of an unsigned manifest.
const SIGNATURE_OVERHEAD: usize = 256;

/// Longest assertion key.
const MAX_KEY_CHARS: usize = 128;

/// One claim about the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Claim name (`creator`, `dc:rights`, ...).
    pub key: String,
    /// Sanitized claim value.
    pub value: String,
}

/// A provenance manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Software that produced the manifest.
    pub generator_id: String,
    /// Unique per signing operation.
    pub instance_id: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Ordered claims.
    pub assertions: Vec<Assertion>,
    /// `sha256:<hex>` of the original, pre-embedding bytes.
    pub content_hash: String,
    /// Algorithm of [`Self::signature`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<SignatureAlgorithm>,
    /// Fingerprint of the signing certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
    /// Signature over the canonical bytes.
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct CanonicalView<'a> {
    domain: &'static str,
    generator_id: &'a str,
    instance_id: &'a Uuid,
    created_at: String,
    assertions: &'a [Assertion],
    content_hash: &'a str,
    signature_algorithm: SignatureAlgorithm,
    certificate_ref: &'a str,
}

impl Manifest {
    /// Canonical bytes to sign with the given algorithm and certificate.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn signing_bytes(
        &self,
        algorithm: SignatureAlgorithm,
        certificate_ref: &str,
    ) -> Result<Vec<u8>> {
        let view = CanonicalView {
            domain: MANIFEST_DOMAIN,
            generator_id: &self.generator_id,
            instance_id: &self.instance_id,
            created_at: self
                .created_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            assertions: &self.assertions,
            content_hash: &self.content_hash,
            signature_algorithm: algorithm,
            certificate_ref,
        };
        Ok(serde_json::to_vec(&view)?)
    }

    /// Canonical bytes of a sealed manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] if the manifest carries no
    /// algorithm or certificate reference.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let (Some(algorithm), Some(certificate_ref)) =
            (self.signature_algorithm, self.certificate_ref.as_deref())
        else {
            return Err(ProvenanceError::validation(
                "manifest has no signing algorithm or certificate reference",
            ));
        };
        self.signing_bytes(algorithm, certificate_ref)
    }

    /// Whether a signature is attached.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.signature.is_some() && self.certificate_ref.is_some()
    }

    /// Attach a signature.
    #[must_use]
    pub fn sealed(mut self, signature: crate::signing::ManifestSignature) -> Self {
        self.signature_algorithm = Some(signature.algorithm);
        self.certificate_ref = Some(signature.certificate_fingerprint);
        self.signature = Some(signature.signature);
        self
    }

    /// First value for `key`.
    #[must_use]
    pub fn assertion(&self, key: &str) -> Option<&str> {
        self.assertions
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is not a manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// `sha256:<hex>` of the serialized manifest.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn hash(&self) -> Result<String> {
        Ok(sha256_ref(&self.to_json()?))
    }

    /// Check `created_at` against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] if `created_at` is more than
    /// `max_clock_skew` ahead or more than `max_staleness` behind.
    pub fn check_freshness(
        &self,
        now: DateTime<Utc>,
        max_clock_skew: Duration,
        max_staleness: Duration,
    ) -> Result<()> {
        let skew = chrono::Duration::from_std(max_clock_skew)
            .map_err(|_| ProvenanceError::config("max_clock_skew out of range"))?;
        let staleness = chrono::Duration::from_std(max_staleness)
            .map_err(|_| ProvenanceError::config("max_staleness out of range"))?;

        if self.created_at > now + skew {
            return Err(ProvenanceError::validation(format!(
                "manifest created_at {} is ahead of now by more than {}s",
                self.created_at,
                max_clock_skew.as_secs()
            )));
        }
        if self.created_at < now - staleness {
            return Err(ProvenanceError::validation(format!(
                "manifest created_at {} is older than {}s",
                self.created_at,
                max_staleness.as_secs()
            )));
        }
        Ok(())
    }
}

/// `sha256:<hex>` of `bytes`.
#[must_use]
pub fn sha256_ref(bytes: &[u8]) -> String {
    format!("{CONTENT_HASH_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

/// Assembles validated, unsigned manifests.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    generator_id: String,
    max_content_bytes: usize,
    max_manifest_bytes: usize,
    max_assertion_bytes: usize,
    max_assertions: usize,
    max_value_chars: usize,
    max_clock_skew: Duration,
    max_staleness: Duration,
}

impl ManifestBuilder {
    /// Builder using the limits in `config`.
    #[must_use]
    pub fn new(config: &SealConfig) -> Self {
        Self {
            generator_id: config.generator_id.clone(),
            max_content_bytes: config.max_content_bytes,
            max_manifest_bytes: config.max_manifest_bytes,
            max_assertion_bytes: config.max_assertion_bytes,
            max_assertions: config.max_assertions,
            max_value_chars: config.max_assertion_value_chars,
            max_clock_skew: config.max_clock_skew,
            max_staleness: config.max_staleness,
        }
    }

    /// Build a manifest for `content` created now.
    ///
    /// # Errors
    ///
    /// See [`Self::build_at`].
    pub fn build<I, K, V>(&self, content: &[u8], metadata: I) -> Result<Manifest>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.build_at(content, metadata, Utc::now())
    }

    /// Build a manifest with an explicit creation time (e.g. capture time).
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Validation`] if `content` is empty or too
    /// large, an assertion key is malformed, there are too many assertions,
    /// the assertions or the manifest serialize too large, or `created_at`
    /// is outside the freshness window.
    pub fn build_at<I, K, V>(
        &self,
        content: &[u8],
        metadata: I,
        created_at: DateTime<Utc>,
    ) -> Result<Manifest>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if content.is_empty() {
            return Err(ProvenanceError::validation("content is empty"));
        }
        if content.len() > self.max_content_bytes {
            return Err(ProvenanceError::validation(format!(
                "content is {} bytes, maximum {}",
                content.len(),
                self.max_content_bytes
            )));
        }

        let mut assertions = Vec::new();
        for (key, value) in metadata {
            if assertions.len() == self.max_assertions {
                return Err(ProvenanceError::validation(format!(
                    "more than {} assertions",
                    self.max_assertions
                )));
            }
            assertions.push(Assertion {
                key: validate_key(key.into())?,
                value: sanitize_value(&value.into(), self.max_value_chars),
            });
        }

        let assertion_bytes = serde_json::to_vec(&assertions)?.len();
        if assertion_bytes > self.max_assertion_bytes {
            return Err(ProvenanceError::validation(format!(
                "assertions serialize to {assertion_bytes} bytes, maximum {}",
                self.max_assertion_bytes
            )));
        }

        let manifest = Manifest {
            generator_id: self.generator_id.clone(),
            instance_id: Uuid::new_v4(),
            created_at: created_at.trunc_subsecs(6),
            assertions,
            content_hash: sha256_ref(content),
            signature_algorithm: None,
            certificate_ref: None,
            signature: None,
        };

        manifest.check_freshness(Utc::now(), self.max_clock_skew, self.max_staleness)?;

        let manifest_bytes = manifest.to_json()?.len() + SIGNATURE_OVERHEAD;
        if manifest_bytes > self.max_manifest_bytes {
            return Err(ProvenanceError::validation(format!(
                "manifest would serialize to {manifest_bytes} bytes, maximum {}",
                self.max_manifest_bytes
            )));
        }

        debug!(
            instance_id = %manifest.instance_id,
            assertions = manifest.assertions.len(),
            content_len = content.len(),
            "ManifestBuilder: built manifest"
        );
        Ok(manifest)
    }
}

fn validate_key(key: String) -> Result<String> {
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(ProvenanceError::validation("assertion key is empty"));
    }
    if key.chars().count() > MAX_KEY_CHARS {
        return Err(ProvenanceError::validation(format!(
            "assertion key longer than {MAX_KEY_CHARS} characters"
        )));
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
    {
        return Err(ProvenanceError::validation(format!(
            "assertion key {key:?} contains {bad:?}"
        )));
    }
    Ok(key)
}

/// Strip control characters and cap the length in characters.
fn sanitize_value(value: &str, max_chars: usize) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect()
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ManifestBuilder {
        ManifestBuilder::new(&SealConfig::default())
    }

    #[test]
    fn test_build_hashes_original_content() {
        let m = builder().build(b"image bytes", [("creator", "Jane")]).unwrap();
        assert_eq!(m.content_hash, sha256_ref(b"image bytes"));
        assert!(m.content_hash.starts_with("sha256:"));
        assert_eq!(m.assertion("creator"), Some("Jane"));
        assert!(!m.is_sealed());
    }

    #[test]
    fn test_instance_ids_unique() {
        let b = builder();
        let ids: std::collections::HashSet<_> = (0..200)
            .map(|_| b.build(b"x", Vec::<(String, String)>::new()).unwrap().instance_id)
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_rejects_empty_and_oversized_content() {
        let config = SealConfig {
            max_content_bytes: 8,
            ..SealConfig::default()
        };
        let b = ManifestBuilder::new(&config);
        assert!(b.build(b"", [("k", "v")]).unwrap_err().is_validation());
        assert!(b.build(&[0u8; 9], [("k", "v")]).unwrap_err().is_validation());
    }

    #[test]
    fn test_sanitizes_values() {
        let config = SealConfig {
            max_assertion_value_chars: 5,
            ..SealConfig::default()
        };
        let m = ManifestBuilder::new(&config)
            .build(b"x", [("note", "a\u{0}b\nc\u{1b}[31mdefgh")])
            .unwrap();
        assert_eq!(m.assertion("note"), Some("abc[3"));
    }

    #[test]
    fn test_rejects_bad_keys_and_counts() {
        assert!(builder().build(b"x", [("", "v")]).is_err());
        assert!(builder().build(b"x", [("bad key", "v")]).is_err());

        let config = SealConfig {
            max_assertions: 2,
            ..SealConfig::default()
        };
        let many = [("a", "1"), ("b", "2"), ("c", "3")];
        assert!(ManifestBuilder::new(&config).build(b"x", many).is_err());
    }

    #[test]
    fn test_rejects_oversized_assertions() {
        let config = SealConfig {
            max_assertion_bytes: 64,
            ..SealConfig::default()
        };
        let long = "v".repeat(100);
        let err = ManifestBuilder::new(&config)
            .build(b"x", [("k", long.as_str())])
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_freshness_window() {
        let b = builder();
        let now = Utc::now();
        assert!(b.build_at(b"x", [("k", "v")], now - chrono::Duration::minutes(10)).is_ok());
        assert!(b.build_at(b"x", [("k", "v")], now + chrono::Duration::hours(1)).is_err());
        assert!(b.build_at(b"x", [("k", "v")], now - chrono::Duration::days(2)).is_err());
    }

    #[test]
    fn test_canonical_bytes_stable_and_exclude_signature() {
        let m = builder().build(b"x", [("creator", "Jane")]).unwrap();
        let a = m.signing_bytes(SignatureAlgorithm::Ed25519, "sha256:ab").unwrap();

        let round = Manifest::from_json(&m.to_json().unwrap()).unwrap();
        let b = round.signing_bytes(SignatureAlgorithm::Ed25519, "sha256:ab").unwrap();
        assert_eq!(a, b);

        let mut sealed = round;
        sealed.signature_algorithm = Some(SignatureAlgorithm::Ed25519);
        sealed.certificate_ref = Some("sha256:ab".into());
        sealed.signature = Some(vec![1, 2, 3]);
        assert_eq!(sealed.canonical_bytes().unwrap(), a);
        assert!(m.canonical_bytes().is_err());
    }

    #[test]
    fn test_signature_serialized_as_base64() {
        let mut m = builder().build(b"x", [("k", "v")]).unwrap();
        m.signature = Some(vec![0xFF, 0x00]);
        let json = String::from_utf8(m.to_json().unwrap()).unwrap();
        assert!(json.contains("\"signature\":\"/wA=\""));
        assert_eq!(Manifest::from_json(json.as_bytes()).unwrap(), m);
    }
}

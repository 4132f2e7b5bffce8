//! Certificate descriptors and key-resolution context.

use chrono::{DateTime, Duration, Utc};
use provseal_crypto::{fingerprint, SignatureAlgorithm};
use serde::{Deserialize, Serialize};

/// Public description of a signing certificate.
///
/// A certificate here is the verifying key plus its validity window. The
/// fingerprint is what sealed manifests carry as `certificate_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// `sha256:<hex>` of the public key.
    pub fingerprint: String,
    /// Human-readable subject.
    pub subject: String,
    /// Signature algorithm of the key.
    pub algorithm: SignatureAlgorithm,
    /// Encoded public key.
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
    /// Start of the validity window.
    pub not_before: DateTime<Utc>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    /// Build a descriptor, deriving the fingerprint from the public key.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        algorithm: SignatureAlgorithm,
        public_key: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint: fingerprint(&public_key),
            subject: subject.into(),
            algorithm,
            public_key,
            not_before,
            not_after,
        }
    }

    /// Whether `now` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    /// Whether the certificate has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    /// Remaining validity at `now` (negative once expired).
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.not_after - now
    }
}

/// Lifecycle phase of the active certificate.
///
/// `Active -> RotationDue -> Rotating -> Active(new)`. A failed rotation
/// falls back to `RotationDue` and the previous certificate keeps signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificatePhase {
    /// Certificate in use with comfortable remaining validity.
    Active,
    /// Remaining validity dropped below the renewal threshold.
    RotationDue,
    /// Renewal in flight; the previous certificate keeps signing.
    Rotating,
}

/// Context passed to a key source when resolving key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContext {
    /// Logical key identifier (file alias, KMS key id, ...).
    pub key_id: String,
    /// What the key will be used for.
    pub purpose: String,
}

impl KeyContext {
    /// Context for manifest signing with the given key identifier.
    #[must_use]
    pub fn manifest_signing(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            purpose: "manifest-signing".to_string(),
        }
    }
}

impl Default for KeyContext {
    fn default() -> Self {
        Self::manifest_signing("provseal_signing_key")
    }
}

/// Serde adapter storing a [`std::time::Duration`] as whole seconds.
///
/// Used by configuration structs so JSON files read `"proof_ttl": 86400`.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as seconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserialize from seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

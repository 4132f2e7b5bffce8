//! Algorithm tags and certificate fingerprints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Four-character code identifying the manifest signature system.
pub type CryptoKind = [u8; 4];

/// provseal manifest signatures, version 1.
pub const CRYPTO_KIND_PROVSEAL_V1: CryptoKind = *b"PSL1";

/// Prefix used for every fingerprint string.
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// Asymmetric signature algorithm used to seal manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// Ed25519 Edwards curve. Default for file and ephemeral keys.
    #[default]
    Ed25519 = 1,

    /// ECDSA with NIST P-256 (secp256r1).
    /// Used when keys come from a KMS that only offers NIST curves.
    EcdsaP256 = 2,
}

impl SignatureAlgorithm {
    /// Signature size in bytes.
    #[must_use]
    pub const fn signature_size(&self) -> usize {
        match self {
            Self::Ed25519 => 64,
            Self::EcdsaP256 => 64, // R (32) + S (32)
        }
    }

    /// Public key size in bytes.
    #[must_use]
    pub const fn public_key_size(&self) -> usize {
        match self {
            Self::Ed25519 => 32,
            Self::EcdsaP256 => 65, // Uncompressed: 0x04 || X || Y
        }
    }

    /// Secret key size in bytes.
    #[must_use]
    pub const fn secret_key_size(&self) -> usize {
        32
    }

    /// Stable name used in key files and manifests.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256 => "ecdsa-p256",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" => Ok(Self::Ed25519),
            "ecdsa-p256" | "p256" | "es256" => Ok(Self::EcdsaP256),
            other => Err(CryptoError::UnknownAlgorithm {
                name: other.to_string(),
            }),
        }
    }
}

/// Signature tagged with the algorithm and the key that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedSignature {
    /// Algorithm used for this signature.
    pub algorithm: SignatureAlgorithm,

    /// Raw signature bytes.
    pub signature: Vec<u8>,

    /// Fingerprint of the verifying key.
    pub fingerprint: String,
}

/// Compute the certificate fingerprint of a public key.
///
/// Format: `sha256:<64 hex chars>`.
#[must_use]
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("{FINGERPRINT_PREFIX}{}", hex::encode(digest))
}

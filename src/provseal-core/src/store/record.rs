//! Proof records and the content keys that address them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::{sha256_ref, Manifest};

/// Similarity-tolerant fingerprint of image bytes.
///
/// Implementations must be deterministic: equal input gives equal output.
pub trait PerceptualHasher: Send + Sync {
    /// Short name recorded alongside the hash.
    fn name(&self) -> &'static str;

    /// Fingerprint of `bytes`, as lowercase hex.
    fn hash(&self, bytes: &[u8]) -> String;
}

/// 64-bit block-mean fingerprint over the byte stream.
///
/// The input is cut into 64 equal blocks; bit `i` is set when block `i`
/// has a mean above the overall mean. Small edits flip few bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMeanHasher;

const BLOCKS: usize = 64;

impl PerceptualHasher for BlockMeanHasher {
    fn name(&self) -> &'static str {
        "block-mean-64"
    }

    fn hash(&self, bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return format!("{:016x}", 0u64);
        }

        let block_len = bytes.len().div_ceil(BLOCKS);
        let means: Vec<u64> = bytes
            .chunks(block_len)
            .map(|block| block.iter().map(|&b| u64::from(b)).sum::<u64>() / block.len() as u64)
            .collect();
        let overall = means.iter().sum::<u64>() / means.len() as u64;

        let bits = means
            .iter()
            .enumerate()
            .filter(|(_, m)| **m > overall)
            .fold(0u64, |acc, (i, _)| acc | (1 << i));
        format!("{bits:016x}")
    }
}

/// Address of a proof record: exact hash plus perceptual hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    /// `sha256:<hex>` of the original bytes.
    pub exact: String,
    /// Perceptual fingerprint, prefixed with the hasher name.
    pub perceptual: String,
}

impl ContentKey {
    /// Derive the key of `bytes`.
    #[must_use]
    pub fn derive(bytes: &[u8], hasher: &dyn PerceptualHasher) -> Self {
        Self {
            exact: sha256_ref(bytes),
            perceptual: format!("{}:{}", hasher.name(), hasher.hash(bytes)),
        }
    }

    /// Flat string form used as the storage key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}#{}", self.exact, self.perceptual)
    }
}

/// A persisted, write-once proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    /// Identifier, also the last path segment of `proof_uri`.
    pub proof_id: Uuid,
    /// Validated HTTPS proof reference.
    pub proof_uri: String,
    /// Address of the record.
    pub content_key: ContentKey,
    /// Sealed manifest.
    pub manifest: Manifest,
    /// Manifest signature.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// `created_at + proof_ttl`.
    pub expires_at: DateTime<Utc>,
}

impl ProofRecord {
    /// Whether the record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

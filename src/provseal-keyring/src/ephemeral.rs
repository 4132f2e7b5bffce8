//! In-memory key source for development and tests.
//!
//! Generates a key at construction and a new one on every renewal. Keys are
//! lost on restart, so proofs signed with them cannot be verified later.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use provseal_crypto::{generate_secret, SignatureAlgorithm};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::handle::KeyMaterial;
use crate::source::{KeySource, SourceKind};
use crate::types::{CertificateInfo, KeyContext};

struct EphemeralKey {
    secret: Zeroizing<Vec<u8>>,
    not_before: chrono::DateTime<Utc>,
    not_after: chrono::DateTime<Utc>,
}

/// Key source holding a generated key in memory.
pub struct EphemeralKeySource {
    algorithm: SignatureAlgorithm,
    subject: String,
    validity: Duration,
    current: Mutex<EphemeralKey>,
}

impl EphemeralKeySource {
    /// Generate a key valid from now for `validity`.
    ///
    /// # Errors
    ///
    /// Returns error if key generation fails.
    pub fn generate(
        algorithm: SignatureAlgorithm,
        subject: impl Into<String>,
        validity: Duration,
    ) -> Result<Self, KeyringError> {
        let subject = subject.into();
        warn!(
            algorithm = %algorithm,
            "EphemeralKeySource: using in-memory key, proofs will not survive restart"
        );
        Ok(Self {
            algorithm,
            subject,
            validity,
            current: Mutex::new(Self::fresh(algorithm, validity)?),
        })
    }

    fn fresh(
        algorithm: SignatureAlgorithm,
        validity: Duration,
    ) -> Result<EphemeralKey, KeyringError> {
        let now = Utc::now();
        Ok(EphemeralKey {
            secret: Zeroizing::new(generate_secret(algorithm)?),
            not_before: now,
            not_after: now + validity,
        })
    }

    fn material(&self, key: &EphemeralKey) -> Result<KeyMaterial, KeyringError> {
        KeyMaterial::new(
            self.algorithm,
            key.secret.clone(),
            self.subject.clone(),
            key.not_before,
            key.not_after,
        )
    }
}

#[async_trait]
impl KeySource for EphemeralKeySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ephemeral
    }

    async fn resolve_key(&self, _context: &KeyContext) -> Result<KeyMaterial, KeyringError> {
        let current = self
            .current
            .lock()
            .map_err(|_| KeyringError::unavailable("ephemeral key lock poisoned"))?;
        self.material(&current)
    }

    async fn renew(
        &self,
        _context: &KeyContext,
        current: &CertificateInfo,
    ) -> Result<KeyMaterial, KeyringError> {
        let next = Self::fresh(self.algorithm, self.validity)?;
        let material = self.material(&next)?;

        let mut guard = self
            .current
            .lock()
            .map_err(|_| KeyringError::unavailable("ephemeral key lock poisoned"))?;
        *guard = next;

        info!(
            previous = %current.fingerprint,
            current = %material.certificate().fingerprint,
            "EphemeralKeySource: generated replacement key"
        );
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_is_stable() {
        let source =
            EphemeralKeySource::generate(SignatureAlgorithm::Ed25519, "dev", Duration::hours(1))
                .unwrap();
        let ctx = KeyContext::default();
        let a = source.resolve_key(&ctx).await.unwrap();
        let b = source.resolve_key(&ctx).await.unwrap();
        assert_eq!(a.certificate().fingerprint, b.certificate().fingerprint);
    }

    #[tokio::test]
    async fn test_renew_replaces_key() {
        let source =
            EphemeralKeySource::generate(SignatureAlgorithm::EcdsaP256, "dev", Duration::hours(1))
                .unwrap();
        let ctx = KeyContext::default();
        let old = source.resolve_key(&ctx).await.unwrap().into_certificate();

        let renewed = source.renew(&ctx, &old).await.unwrap();
        assert_ne!(renewed.certificate().fingerprint, old.fingerprint);

        let resolved = source.resolve_key(&ctx).await.unwrap();
        assert_eq!(
            resolved.certificate().fingerprint,
            renewed.certificate().fingerprint
        );
    }
}

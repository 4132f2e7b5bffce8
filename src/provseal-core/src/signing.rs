//! Manifest signing and verification.

use std::sync::Arc;

use chrono::Utc;
use provseal_crypto::{constant_time_eq, fingerprint, verifier_for, SignatureAlgorithm};
use provseal_keyring::{CertificateManager, KeyHandle};
use tracing::{debug, info, instrument, warn};

use crate::error::{ProvenanceError, Result};
use crate::manifest::Manifest;

/// Output of [`SigningEngine::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSignature {
    /// Raw signature bytes.
    pub signature: Vec<u8>,
    /// Fingerprint of the signing certificate.
    pub certificate_fingerprint: String,
    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,
}

/// Signs manifests with keys from a [`CertificateManager`].
pub struct SigningEngine {
    certificates: Arc<CertificateManager>,
}

impl SigningEngine {
    /// Engine drawing keys from `certificates`.
    #[must_use]
    pub fn new(certificates: Arc<CertificateManager>) -> Self {
        Self { certificates }
    }

    /// Certificate manager in use.
    #[must_use]
    pub fn certificates(&self) -> &Arc<CertificateManager> {
        &self.certificates
    }

    /// Sign the canonical bytes of `manifest` with `handle`.
    ///
    /// The handle is consumed and released whether or not signing succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Signing`] if the handle is released or its
    /// certificate is outside its validity window, or the signer fails.
    pub fn sign(manifest: &Manifest, handle: KeyHandle) -> Result<ManifestSignature> {
        let result = Self::sign_inner(manifest, &handle);
        handle.release();
        result
    }

    fn sign_inner(manifest: &Manifest, handle: &KeyHandle) -> Result<ManifestSignature> {
        if !handle.is_usable_at(Utc::now()) {
            return Err(ProvenanceError::signing(format!(
                "key handle for {} is expired or released",
                handle.fingerprint()
            )));
        }

        let algorithm = handle.algorithm();
        let certificate_fingerprint = handle.fingerprint().to_string();
        let payload = manifest.signing_bytes(algorithm, &certificate_fingerprint)?;

        let signer = handle
            .signer()
            .map_err(|e| ProvenanceError::signing(e.to_string()))?;
        let signature = signer
            .sign(&payload)
            .map_err(|e| ProvenanceError::signing(e.to_string()))?;

        debug!(
            instance_id = %manifest.instance_id,
            fingerprint = %certificate_fingerprint,
            algorithm = %algorithm,
            held_ms = handle.age().as_millis() as u64,
            "SigningEngine: signed manifest"
        );
        Ok(ManifestSignature {
            signature,
            certificate_fingerprint,
            algorithm,
        })
    }

    /// Acquire a key, sign `manifest`, and return it sealed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Signing`] if no usable key is available or
    /// signing fails. Never retried.
    #[instrument(skip(self, manifest), fields(instance_id = %manifest.instance_id))]
    pub async fn seal(&self, manifest: Manifest) -> Result<Manifest> {
        let handle = self.certificates.signing_key().await.map_err(|e| {
            warn!("SigningEngine: no signing key: {}", e);
            ProvenanceError::signing(e.to_string())
        })?;
        let signature = Self::sign(&manifest, handle)?;
        info!(
            fingerprint = %signature.certificate_fingerprint,
            "SigningEngine: manifest sealed"
        );
        Ok(manifest.sealed(signature))
    }

    /// Verify a sealed manifest against `public_key`.
    ///
    /// The key's fingerprint must equal the manifest's `certificate_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::VerificationFailed`] if the manifest is
    /// unsigned, names another certificate, or the signature is invalid.
    pub fn verify(manifest: &Manifest, public_key: &[u8]) -> Result<()> {
        let fail = |reason: &str| ProvenanceError::VerificationFailed {
            reason: reason.to_string(),
        };

        let (Some(signature), Some(certificate_ref), Some(algorithm)) = (
            manifest.signature.as_deref(),
            manifest.certificate_ref.as_deref(),
            manifest.signature_algorithm,
        ) else {
            return Err(fail("manifest is not sealed"));
        };

        if !constant_time_eq(fingerprint(public_key).as_bytes(), certificate_ref.as_bytes()) {
            return Err(fail("public key does not match certificate reference"));
        }

        let payload = manifest.canonical_bytes()?;
        let valid = verifier_for(algorithm)?
            .verify(public_key, &payload, signature)
            .unwrap_or(false);
        if !valid {
            return Err(fail("signature does not verify"));
        }
        Ok(())
    }
}

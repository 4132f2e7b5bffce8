//! ECDSA over NIST P-256 with SHA-256, for keys issued by a key-management
//! service that only offers NIST curves.
//!
//! Secrets are the 32-byte big-endian scalar, public keys the uncompressed
//! SEC1 point, signatures fixed-width `r || s`. Signing is deterministic
//! (RFC 6979).

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;

use crate::error::CryptoError;
use crate::signer::{ContentSigner, ContentVerifier};
use crate::types::SignatureAlgorithm;

const ALG: SignatureAlgorithm = SignatureAlgorithm::EcdsaP256;

/// P-256 signer over an in-memory scalar.
pub struct P256Signer {
    key: SigningKey,
}

impl P256Signer {
    /// Fresh key from the OS RNG.
    #[must_use]
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Signer from a 32-byte secret scalar.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPrivateKey`] for a wrong length, zero,
    /// or a scalar outside the curve order.
    pub fn from_bytes(scalar: &[u8]) -> Result<Self, CryptoError> {
        if scalar.len() != ALG.secret_key_size() {
            return Err(CryptoError::invalid_private_key(format!(
                "{ALG} scalar: expected {} bytes, got {}",
                ALG.secret_key_size(),
                scalar.len()
            )));
        }
        SigningKey::from_slice(scalar)
            .map(|key| Self { key })
            .map_err(|e| CryptoError::invalid_private_key(format!("{ALG} scalar: {e}")))
    }

    /// The secret scalar. Callers own zeroizing the returned buffer.
    #[must_use]
    pub fn secret_bytes(&self) -> Vec<u8> {
        self.key.to_bytes().to_vec()
    }
}

impl ContentSigner for P256Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        ALG
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let point = self.key.verifying_key().to_encoded_point(false);
        Ok(point.as_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self
            .key
            .try_sign(data)
            .map_err(|e| CryptoError::signing_failed(format!("{ALG}: {e}")))?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// Stateless P-256 verifier. Accepts compressed or uncompressed keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct P256Verifier;

impl P256Verifier {
    /// Verifier instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ContentVerifier for P256Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let key = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| CryptoError::invalid_public_key(format!("{ALG} point: {e}")))?;
        if signature.len() != ALG.signature_size() {
            return Err(CryptoError::invalid_signature(format!(
                "{ALG} signature: expected {} bytes, got {}",
                ALG.signature_size(),
                signature.len()
            )));
        }
        let Ok(signature) = Signature::from_slice(signature) else {
            // Zero r or s: well-formed length, never valid.
            return Ok(false);
        };
        Ok(key.verify(data, &signature).is_ok())
    }
}

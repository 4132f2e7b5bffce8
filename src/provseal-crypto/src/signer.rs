//! Signer and verifier traits plus algorithm dispatch.
//!
//! Every algorithm implements the same pair of traits so that the signing
//! engine can stay agnostic of the curve that backs the active certificate.

use crate::error::CryptoError;
use crate::types::{fingerprint, SignatureAlgorithm, TaggedSignature};

/// Trait for signature creation.
pub trait ContentSigner: Send + Sync {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the public key.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and tag the result with the algorithm and key fingerprint.
    fn sign_tagged(&self, data: &[u8]) -> Result<TaggedSignature, CryptoError> {
        let signature = self.sign(data)?;
        Ok(TaggedSignature {
            algorithm: self.algorithm(),
            signature,
            fingerprint: fingerprint(&self.public_key()?),
        })
    }
}

/// Trait for signature verification.
pub trait ContentVerifier: Send + Sync {
    /// Verify a signature against a public key.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not verify,
    /// and an error for malformed keys or signatures.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;
}

/// Build a signer for `algorithm` from raw secret key bytes.
///
/// # Errors
///
/// Returns error if the algorithm is compiled out or the key is malformed.
pub fn signer_from_secret(
    algorithm: SignatureAlgorithm,
    secret: &[u8],
) -> Result<Box<dyn ContentSigner>, CryptoError> {
    match algorithm {
        #[cfg(feature = "ed25519")]
        SignatureAlgorithm::Ed25519 => Ok(Box::new(crate::Ed25519Signer::from_seed(secret)?)),
        #[cfg(feature = "ecdsa-p256")]
        SignatureAlgorithm::EcdsaP256 => Ok(Box::new(crate::P256Signer::from_bytes(secret)?)),
        #[allow(unreachable_patterns)]
        other => Err(CryptoError::UnsupportedAlgorithm { algorithm: other }),
    }
}

/// Get a verifier for `algorithm`.
///
/// # Errors
///
/// Returns error if the algorithm is compiled out.
pub fn verifier_for(
    algorithm: SignatureAlgorithm,
) -> Result<Box<dyn ContentVerifier>, CryptoError> {
    match algorithm {
        #[cfg(feature = "ed25519")]
        SignatureAlgorithm::Ed25519 => Ok(Box::new(crate::Ed25519Verifier::new())),
        #[cfg(feature = "ecdsa-p256")]
        SignatureAlgorithm::EcdsaP256 => Ok(Box::new(crate::P256Verifier::new())),
        #[allow(unreachable_patterns)]
        other => Err(CryptoError::UnsupportedAlgorithm { algorithm: other }),
    }
}

/// Generate fresh secret key bytes for `algorithm`.
///
/// # Errors
///
/// Returns error if the algorithm is compiled out.
pub fn generate_secret(algorithm: SignatureAlgorithm) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        #[cfg(feature = "ed25519")]
        SignatureAlgorithm::Ed25519 => Ok(crate::Ed25519Signer::random().secret_bytes()),
        #[cfg(feature = "ecdsa-p256")]
        SignatureAlgorithm::EcdsaP256 => Ok(crate::P256Signer::random().secret_bytes()),
        #[allow(unreachable_patterns)]
        other => Err(CryptoError::UnsupportedAlgorithm { algorithm: other }),
    }
}

//! Ed25519, the default manifest signature.
//!
//! Keys travel as the 32-byte seed; public keys as the 32-byte compressed
//! point; signatures as `R || S` (64 bytes).

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;
use crate::signer::{ContentSigner, ContentVerifier};
use crate::types::SignatureAlgorithm;

const ALG: SignatureAlgorithm = SignatureAlgorithm::Ed25519;

/// Copy `bytes` into a fixed array, or describe the length mismatch.
fn exact<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], String> {
    bytes
        .try_into()
        .map_err(|_| format!("{ALG} {what}: expected {N} bytes, got {}", bytes.len()))
}

/// Ed25519 signer over an in-memory seed.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Fresh key from the OS RNG.
    #[must_use]
    pub fn random() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Signer from a 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPrivateKey`] for any other length.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed = exact::<32>(seed, "seed").map_err(CryptoError::invalid_private_key)?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    /// The seed. Callers own zeroizing the returned buffer.
    #[must_use]
    pub fn secret_bytes(&self) -> Vec<u8> {
        self.key.as_bytes().to_vec()
    }
}

impl ContentSigner for Ed25519Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        ALG
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key.verifying_key().as_bytes().to_vec())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key.sign(data).to_bytes().to_vec())
    }
}

/// Stateless Ed25519 verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Verifier instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ContentVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let point = exact::<32>(public_key, "public key").map_err(CryptoError::invalid_public_key)?;
        let key = VerifyingKey::from_bytes(&point)
            .map_err(|e| CryptoError::invalid_public_key(e.to_string()))?;
        let signature = Signature::from_bytes(
            &exact::<64>(signature, "signature").map_err(CryptoError::invalid_signature)?,
        );

        // Strict verification rejects small-order keys and malleable S.
        Ok(key.verify_strict(data, &signature).is_ok())
    }
}

//! # provseal-crypto
//!
//! Signature primitives for provseal provenance manifests.
//!
//! Manifests are sealed with a single asymmetric signature over their
//! canonical byte encoding. Two algorithms are available:
//! - **Ed25519**: default for file-backed and ephemeral keys
//! - **ECDSA P-256**: for keys issued by NIST-only key-management services
//!
//! ## Certificate references
//!
//! A sealed manifest names the key that signed it by fingerprint:
//!
//! ```text
//! certificate_ref = "sha256:" || hex(SHA-256(public_key))
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod signer;
mod types;

#[cfg(feature = "ecdsa-p256")]
mod ecdsa;

#[cfg(feature = "ed25519")]
mod ed25519;

pub use error::CryptoError;
pub use signer::{
    generate_secret, signer_from_secret, verifier_for, ContentSigner, ContentVerifier,
};
pub use types::{
    fingerprint, CryptoKind, SignatureAlgorithm, TaggedSignature, CRYPTO_KIND_PROVSEAL_V1,
    FINGERPRINT_PREFIX,
};

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};

#[cfg(feature = "ed25519")]
pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Constant-time byte comparison.
///
/// Must be used for fingerprint and signature comparisons.
/// The length check returns early; length is not secret here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_equal() {
        let a = [1u8, 2, 3, 4, 5];
        let b = [1u8, 2, 3, 4, 5];
        assert!(constant_time_eq(&a, &b));
    }

    #[test]
    fn test_constant_time_eq_different() {
        let a = [1u8, 2, 3, 4, 5];
        let b = [1u8, 2, 3, 4, 6];
        assert!(!constant_time_eq(&a, &b));
    }

    #[test]
    fn test_constant_time_eq_different_length() {
        let a = [1u8, 2, 3, 4];
        let b = [1u8, 2, 3, 4, 5];
        assert!(!constant_time_eq(&a, &b));
    }
}

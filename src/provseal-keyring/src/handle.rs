//! Resolved key material and scoped key handles.
//!
//! Raw secret bytes only ever live inside [`zeroize::Zeroizing`] buffers.
//! A [`KeyHandle`] is acquired for exactly one signing operation and is
//! cleared when released or dropped.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use provseal_crypto::{signer_from_secret, ContentSigner, SignatureAlgorithm};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::types::CertificateInfo;

/// Secret key bytes together with their certificate.
///
/// Produced by a [`crate::KeySource`] and converted into a [`KeyHandle`]
/// by the certificate manager.
pub struct KeyMaterial {
    secret: Zeroizing<Vec<u8>>,
    certificate: CertificateInfo,
}

impl KeyMaterial {
    /// Build key material from a secret, deriving the certificate's public key.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is not a valid key for `algorithm` or the
    /// validity window is empty.
    pub fn new(
        algorithm: SignatureAlgorithm,
        secret: Zeroizing<Vec<u8>>,
        subject: impl Into<String>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Self, KeyringError> {
        if not_after <= not_before {
            return Err(KeyringError::invalid_key(
                "certificate validity window is empty",
            ));
        }

        let signer = signer_from_secret(algorithm, &secret)?;
        let public_key = signer.public_key()?;
        let certificate =
            CertificateInfo::new(subject, algorithm, public_key, not_before, not_after);

        Ok(Self {
            secret,
            certificate,
        })
    }

    /// The certificate for this key.
    #[must_use]
    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    /// Drop the secret and keep only the public certificate.
    #[must_use]
    pub fn into_certificate(self) -> CertificateInfo {
        self.certificate
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("secret", &"<redacted>")
            .field("certificate", &self.certificate.fingerprint)
            .finish()
    }
}

/// Scoped handle to signing key material.
///
/// The secret is wiped when the handle is released or dropped.
pub struct KeyHandle {
    secret: Zeroizing<Vec<u8>>,
    certificate: CertificateInfo,
    acquired_at: Instant,
}

impl KeyHandle {
    /// Certificate bound to this handle.
    #[must_use]
    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    /// Fingerprint of the certificate.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.certificate.fingerprint
    }

    /// Signature algorithm of the key.
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.certificate.algorithm
    }

    /// Whether the certificate is usable at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.secret.is_empty() && self.certificate.is_valid_at(now)
    }

    /// Time since the handle was acquired.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }

    /// Build a signer over the secret.
    ///
    /// # Errors
    ///
    /// Returns error if the handle was cleared or the key is malformed.
    pub fn signer(&self) -> Result<Box<dyn ContentSigner>, KeyringError> {
        if self.secret.is_empty() {
            return Err(KeyringError::invalid_key("key handle already released"));
        }
        Ok(signer_from_secret(self.certificate.algorithm, &self.secret)?)
    }

    /// Release the handle, wiping the secret.
    pub fn release(mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        // Zeroizing wipes the old buffer when it is replaced.
        self.secret = Zeroizing::new(Vec::new());
    }
}

impl From<KeyMaterial> for KeyHandle {
    fn from(material: KeyMaterial) -> Self {
        Self {
            secret: material.secret,
            certificate: material.certificate,
            acquired_at: Instant::now(),
        }
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("secret", &"<redacted>")
            .field("fingerprint", &self.certificate.fingerprint)
            .field("algorithm", &self.certificate.algorithm)
            .finish()
    }
}

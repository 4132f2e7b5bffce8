//! Error types for key sources and certificate management.

use thiserror::Error;

/// Errors that can occur while resolving keys or managing certificates.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// Key with the specified identifier not found.
    #[error("Key not found: {key_id}")]
    KeyNotFound {
        /// The key identifier that was not found.
        key_id: String,
    },

    /// Key material could not be parsed or is inconsistent.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// The certificate behind the key is outside its validity window.
    #[error("Certificate {fingerprint} expired at {not_after}")]
    CertificateExpired {
        /// Fingerprint of the expired certificate.
        fingerprint: String,
        /// End of the validity window (RFC 3339).
        not_after: String,
    },

    /// The certificate manager has not been initialized.
    #[error("Certificate manager not initialized")]
    NotInitialized,

    /// The key source could not be reached.
    #[error("Key source unavailable: {reason}")]
    SourceUnavailable {
        /// Reason for the failure.
        reason: String,
    },

    /// Remote unwrap of a data key failed.
    #[error("Key decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Certificate renewal failed.
    #[error("Renewal failed: {reason}")]
    RenewalFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Operation not supported by this source.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// The scheduler could not be started or stopped.
    #[error("Scheduler error: {reason}")]
    Scheduler {
        /// Reason for the failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signature primitive error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] provseal_crypto::CryptoError),
}

impl KeyringError {
    /// Create an invalid key error.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create a source unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a renewal failed error.
    #[must_use]
    pub fn renewal(reason: impl Into<String>) -> Self {
        Self::RenewalFailed {
            reason: reason.into(),
        }
    }

    /// Whether retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::DecryptionFailed { .. } | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for KeyringError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

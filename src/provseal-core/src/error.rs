//! Error types for sealing, embedding, extraction and storage.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors that can occur in provenance operations.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    /// Caller supplied bad input: empty or unsupported image, invalid proof
    /// reference, oversized or stale manifest. Never retried.
    #[error("Validation failed: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// Signing could not complete (key unavailable, expired or malformed).
    /// Fatal for the current operation.
    #[error("Signing failed: {reason}")]
    Signing {
        /// Reason for failure.
        reason: String,
    },

    /// Signature did not verify against the manifest.
    #[error("Signature verification failed: {reason}")]
    VerificationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// Container/chunk encoding error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Durable storage error.
    #[error("Storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] provseal_crypto::CryptoError),

    /// Keyring error.
    #[error("Keyring error: {0}")]
    Keyring(#[from] provseal_keyring::KeyringError),
}

impl ProvenanceError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a signing error.
    #[must_use]
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::Signing {
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error is the caller's fault.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error aborted a signing operation.
    #[must_use]
    pub fn is_signing(&self) -> bool {
        matches!(self, Self::Signing { .. })
    }
}

impl From<std::io::Error> for ProvenanceError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

/// Result alias for provenance operations.
pub type Result<T, E = ProvenanceError> = std::result::Result<T, E>;

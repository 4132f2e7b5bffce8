//! # provseal-keyring
//!
//! Signing key sources and certificate lifecycle for provseal.
//!
//! Key material comes from a [`KeySource`] collaborator:
//!
//! | Source | Backing store | Renewal |
//! |--------|---------------|---------|
//! | [`FileKeySource`] | JSON key file | re-reads the file |
//! | [`EnvelopeKeySource`] | sealed key + KMS-wrapped data key | not supported |
//! | [`EphemeralKeySource`] | memory (development) | generates a new key |
//!
//! The [`CertificateManager`] tracks the active certificate, hands out
//! scoped [`KeyHandle`]s, and renews on a background schedule.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use provseal_keyring::{CertificateManager, FileKeySource, KeyContext, RotationConfig};
//!
//! let source = Arc::new(FileKeySource::new("/etc/provseal/signing.json"));
//! let manager = Arc::new(CertificateManager::new(
//!     source,
//!     KeyContext::manifest_signing("signing"),
//!     RotationConfig::default(),
//! ));
//! manager.init().await?;
//! manager.start_rotation_scheduler()?;
//!
//! let handle = manager.signing_key().await?;
//! let signature = handle.signer()?.sign(b"canonical manifest bytes")?;
//! handle.release();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod certificate;
mod envelope;
mod ephemeral;
mod error;
mod file;
mod handle;
mod source;
mod types;

pub use certificate::{CertificateManager, RotationConfig, RotationOutcome};
pub use envelope::{
    open, seal, seal_key_file, EnvelopeKeySource, KeyDecryptor, LocalKeyDecryptor, DATA_KEY_SIZE,
};
pub use ephemeral::EphemeralKeySource;
pub use error::KeyringError;
pub use file::{FileKeySource, KeyFile};
pub use handle::{KeyHandle, KeyMaterial};
pub use source::{KeySource, SourceKind};
pub use types::{duration_secs, CertificateInfo, CertificatePhase, KeyContext};

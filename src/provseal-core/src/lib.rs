//! # provseal-core
//!
//! Image provenance: build and seal a manifest, bind it into JPEG, PNG or
//! WEBP bytes, recover the binding from a copy that may have been
//! transformed or damaged, and keep a write-once proof record for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ProvenanceService                         │
//! │                                                               │
//! │  ManifestBuilder ──► SigningEngine ──► MetadataEmbedder ──┐   │
//! │                      (CertificateManager)  │              │   │
//! │                                            ▼              ▼   │
//! │                                     formats::{jpeg,     ProofStore
//! │                                      png, webp}        (cache +
//! │                                            │            backend)
//! │                                            ▼              ▲   │
//! │                                     codec::{boxes,        │   │
//! │                                      chunk, fragment}     │   │
//! │                                            ▲              │   │
//! │                                            │              │   │
//! │  MetadataExtractor (strategy chain) ───────┴──────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Input untouched**: embedding always returns a new buffer
//! - **Validated references**: proof references are checked before they
//!   are written and again when they are recovered
//! - **Degradation is visible**: a failed container embed and a
//!   low-confidence recovery are both reported, never hidden
//! - **Write-once**: one live record per content key

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod binding;
pub mod codec;
pub mod config;
pub mod embed;
pub mod error;
pub mod exif;
pub mod extract;
pub mod formats;
pub mod manifest;
pub mod proof_uri;
pub mod service;
pub mod signing;
pub mod store;
pub mod types;
pub mod xmp;

pub use codec::CodecError;
pub use config::SealConfig;
pub use embed::{EmbeddingResult, MetadataEmbedder};
pub use error::{ProvenanceError, Result};
pub use extract::{ExtractionResult, ExtractionStrategy, MetadataExtractor};
pub use formats::{FormatRegistry, ImageContainer, SegmentInfo};
pub use manifest::{Assertion, Manifest, ManifestBuilder};
pub use proof_uri::validate_proof_uri;
pub use service::{LookupResult, ProvenanceService, SignedImage};
pub use signing::{ManifestSignature, SigningEngine};
pub use store::{
    BlockMeanHasher, ContentKey, FilesystemBackend, MemoryBackend, PerceptualHasher, ProofRecord,
    ProofStore, StorageBackend, StoreOutcome,
};
pub use types::{Confidence, EmbedStrategy, ExtractionStrategyKind, ImageFormat};

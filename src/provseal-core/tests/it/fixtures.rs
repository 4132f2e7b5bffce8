//! Synthetic images and a wired-up service.

use std::sync::Arc;

use provseal_core::codec::encode_chunk;
use provseal_core::config::SealConfig;
use provseal_core::manifest::{Manifest, ManifestBuilder};
use provseal_core::signing::SigningEngine;
use provseal_core::store::{MemoryBackend, ProofStore, StorageBackend};
use provseal_core::types::PNG_SIGNATURE;
use provseal_core::ProvenanceService;
use provseal_crypto::SignatureAlgorithm;
use provseal_keyring::{CertificateManager, EphemeralKeySource, KeyContext, RotationConfig};

/// Entropy-coded bytes that never contain a marker.
fn scan_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + 3) % 0xFE) as u8).collect()
}

/// Baseline JPEG: JFIF APP0, DQT, SOF0, SOS, `scan_len` bytes of scan
/// data, EOI.
pub fn jpeg(scan_len: usize) -> Vec<u8> {
    let mut v = vec![0xFF, 0xD8];
    v.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    v.extend_from_slice(b"JFIF\0");
    v.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);

    v.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
    v.extend((1..=64).map(|q: u8| q));

    v.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x10, 0x00, 0x10, 0x01, 0x01, 0x11, 0x00]);
    v.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
    v.extend_from_slice(&scan_bytes(scan_len));
    v.extend_from_slice(&[0xFF, 0xD9]);
    v
}

/// PNG with IHDR, one IDAT of `idat_len` bytes, IEND.
pub fn png(idat_len: usize) -> Vec<u8> {
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&16u32.to_be_bytes());
    ihdr.extend_from_slice(&16u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);

    let mut v = PNG_SIGNATURE.to_vec();
    v.extend_from_slice(&encode_chunk(*b"IHDR", &ihdr).unwrap());
    v.extend_from_slice(&encode_chunk(*b"IDAT", &scan_bytes(idat_len)).unwrap());
    v.extend_from_slice(&encode_chunk(*b"IEND", &[]).unwrap());
    v
}

/// Simple-format lossless WEBP (16x16) with `data_len` bytes after the
/// VP8L header.
pub fn webp(data_len: usize) -> Vec<u8> {
    let bits: u32 = 15 | (15 << 14);
    let mut vp8l = vec![0x2F];
    vp8l.extend_from_slice(&bits.to_le_bytes());
    vp8l.extend_from_slice(&scan_bytes(data_len));

    let mut chunk = b"VP8L".to_vec();
    chunk.extend_from_slice(&(vp8l.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&vp8l);
    if vp8l.len() % 2 == 1 {
        chunk.push(0);
    }

    let mut v = b"RIFF".to_vec();
    v.extend_from_slice(&((chunk.len() + 4) as u32).to_le_bytes());
    v.extend_from_slice(b"WEBP");
    v.extend_from_slice(&chunk);
    v
}

/// An initialized certificate manager over an in-memory key.
pub async fn certificates() -> Arc<CertificateManager> {
    let source =
        EphemeralKeySource::generate(SignatureAlgorithm::Ed25519, "it", chrono::Duration::days(30))
            .unwrap();
    let manager = Arc::new(CertificateManager::new(
        Arc::new(source),
        KeyContext::manifest_signing("it"),
        RotationConfig::default(),
    ));
    manager.init().await.unwrap();
    manager
}

/// A sealed manifest for `content` with the given assertions.
pub async fn sealed_manifest(
    config: &SealConfig,
    certificates: &Arc<CertificateManager>,
    content: &[u8],
    metadata: &[(&str, &str)],
) -> Manifest {
    let manifest = ManifestBuilder::new(config)
        .build(content, metadata.iter().copied())
        .unwrap();
    SigningEngine::new(certificates.clone())
        .seal(manifest)
        .await
        .unwrap()
}

/// Service, its store and backend, and its certificate manager.
pub struct Rig {
    pub service: ProvenanceService,
    pub store: Arc<ProofStore>,
    pub backend: Arc<dyn StorageBackend>,
    pub certificates: Arc<CertificateManager>,
}

pub async fn rig(config: SealConfig) -> Rig {
    let certificates = certificates().await;
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let store = Arc::new(ProofStore::new(backend.clone(), &config));
    let service = ProvenanceService::new(config, certificates.clone(), store.clone()).unwrap();
    Rig {
        service,
        store,
        backend,
        certificates,
    }
}

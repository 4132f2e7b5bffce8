//! Damaged, truncated and hostile input.

use provseal_core::config::SealConfig;
use provseal_core::embed::MetadataEmbedder;
use provseal_core::extract::MetadataExtractor;
use provseal_core::formats::png::{CHUNK_MANIFEST, CHUNK_REFERENCE};
use provseal_core::manifest::Manifest;
use provseal_core::types::{Confidence, ExtractionStrategyKind, PNG_SIGNATURE};
use provseal_core::ProvenanceError;

use crate::fixtures::{certificates, jpeg, png, sealed_manifest, webp};

const PROOF_URI: &str = "https://proofs.example.com/p/7f0c2a";

async fn signed(image: Vec<u8>, config: &SealConfig) -> (Vec<u8>, Manifest) {
    let certs = certificates().await;
    let manifest = sealed_manifest(config, &certs, &image, &[("creator", "Jane")]).await;
    let bytes = MetadataEmbedder::new(config)
        .embed(&image, &manifest, PROOF_URI)
        .unwrap()
        .modified_bytes;
    (bytes, manifest)
}

fn position(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present")
}

/// Drop the `nth` APP11 segment from a JPEG.
fn drop_app11(image: &[u8], nth: usize) -> Vec<u8> {
    let mut pos = 2;
    let mut seen = 0;
    while pos + 4 <= image.len() && image[pos] == 0xFF {
        let marker = image[pos + 1];
        let len = u16::from_be_bytes([image[pos + 2], image[pos + 3]]) as usize;
        if marker == 0xEB {
            if seen == nth {
                let mut out = image[..pos].to_vec();
                out.extend_from_slice(&image[pos + 2 + len..]);
                return out;
            }
            seen += 1;
        }
        if marker == 0xDA {
            break;
        }
        pos += 2 + len;
    }
    panic!("no APP11 segment {nth}");
}

#[tokio::test]
async fn flipped_manifest_chunk_bit_is_never_reported_as_valid() {
    let config = SealConfig::default();
    let (mut bytes, manifest) = signed(png(128), &config).await;

    let data_start = position(&bytes, &CHUNK_MANIFEST) + 4;
    bytes[data_start + 20] ^= 0x01;

    let result = MetadataExtractor::new(&config).extract(&bytes).unwrap();
    assert!(result.found);
    assert_ne!(result.confidence, Some(Confidence::High));
    assert!(result.degraded);
    assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI));
    if let Some(recovered) = result.manifest {
        assert_eq!(recovered, manifest);
    }
}

#[tokio::test]
async fn flipped_reference_chunk_bit_falls_back_to_intact_copy() {
    let config = SealConfig::default();
    let (mut bytes, _) = signed(png(128), &config).await;

    let data_start = position(&bytes, &CHUNK_REFERENCE) + 4;
    bytes[data_start + 4] ^= 0x01;

    let result = MetadataExtractor::new(&config).extract(&bytes).unwrap();
    assert!(result.found);
    assert!(result.degraded);
    assert_ne!(result.strategy_used, Some(ExtractionStrategyKind::FormatChunks));
    assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI));
}

#[tokio::test]
async fn missing_container_segment_fails_closed() {
    let config = SealConfig {
        jpeg_segment_payload: 64,
        ..SealConfig::default()
    };
    let (bytes, _) = signed(jpeg(128), &config).await;
    let damaged = drop_app11(&bytes, 1);

    let result = MetadataExtractor::new(&config).extract(&damaged).unwrap();
    assert!(result.found);
    assert_ne!(result.strategy_used, Some(ExtractionStrategyKind::ContainerBox));
    assert!(result.degraded);
    assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI));
}

#[tokio::test]
async fn truncation_never_yields_a_wrong_reference() {
    let config = SealConfig::default();
    let extractor = MetadataExtractor::new(&config);

    for image in [jpeg(2048), png(2048), webp(2048)] {
        let (bytes, _) = signed(image, &config).await;
        for cut in (1..bytes.len()).step_by(97) {
            let result = extractor.extract(&bytes[..cut]).unwrap();
            if result.found {
                assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI), "cut at {cut}");
            } else {
                assert!(result.proof_uri.is_none());
            }
        }
    }
}

#[tokio::test]
async fn garbage_is_not_found() {
    let extractor = MetadataExtractor::new(&SealConfig::default());

    let noise: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
    let mut fake_png = PNG_SIGNATURE.to_vec();
    fake_png.extend_from_slice(&noise);
    let mut fake_jpeg = vec![0xFF, 0xD8, 0xFF, 0xEB, 0xFF, 0xFF];
    fake_jpeg.extend_from_slice(&noise);

    for bytes in [noise.clone(), fake_png, fake_jpeg, b"RIFF\xff\xff\xff\xffWEBP".to_vec()] {
        let result = extractor.extract(&bytes).unwrap();
        assert!(!result.found);
        assert!(result.manifest.is_none());
    }
}

#[test]
fn empty_input_is_an_error() {
    let result = MetadataExtractor::new(&SealConfig::default()).extract(&[]);
    assert!(matches!(result, Err(ProvenanceError::Validation { .. })));
}

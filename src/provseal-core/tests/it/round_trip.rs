//! sign_and_embed followed by extract_and_lookup, per format and size.

use provseal_core::config::SealConfig;
use provseal_core::signing::SigningEngine;
use provseal_core::types::{Confidence, EmbedStrategy, ExtractionStrategyKind, ImageFormat};

use crate::fixtures::{jpeg, png, rig, webp};

const SIZES: [usize; 3] = [16, 4 * 1024, 200 * 1024];

async fn assert_round_trip(image: Vec<u8>, expect: (ImageFormat, EmbedStrategy, ExtractionStrategyKind, Confidence)) {
    let rig = rig(SealConfig::default()).await;
    let original = image.clone();

    let signed = rig
        .service
        .sign_and_embed(&image, [("creator", "Jane"), ("title", "Harbour at dusk")])
        .await
        .unwrap();
    assert_eq!(image, original, "input must not be modified");
    assert_eq!(signed.format, expect.0);
    assert_eq!(signed.strategy, expect.1);
    assert!(signed.was_new);
    assert!(signed.signed_bytes.len() > image.len());
    assert!(signed.manifest_hash.starts_with("sha256:"));

    let lookup = rig.service.extract_and_lookup(&signed.signed_bytes).await.unwrap();
    let extraction = lookup.extraction;
    assert!(extraction.found);
    assert_eq!(extraction.format, expect.0);
    assert_eq!(extraction.proof_uri.as_deref(), Some(signed.proof_uri.as_str()));
    assert_eq!(extraction.strategy_used, Some(expect.2));
    assert_eq!(extraction.confidence, Some(expect.3));
    assert_eq!(extraction.degraded, expect.3 < Confidence::High);

    let manifest = extraction.manifest.expect("manifest recovered");
    assert_eq!(manifest.assertion("creator"), Some("Jane"));
    assert_eq!(manifest.assertion("title"), Some("Harbour at dusk"));

    let public_key = rig.certificates.current_certificate().unwrap().public_key;
    SigningEngine::verify(&manifest, &public_key).unwrap();

    let record = lookup.record.expect("record resolved");
    assert_eq!(record.proof_id, signed.proof_id);
    assert_eq!(record.manifest, manifest);
}

#[tokio::test]
async fn jpeg_round_trip() {
    for size in SIZES {
        assert_round_trip(
            jpeg(size),
            (
                ImageFormat::Jpeg,
                EmbedStrategy::Secondary,
                ExtractionStrategyKind::ContainerBox,
                Confidence::High,
            ),
        )
        .await;
    }
}

#[tokio::test]
async fn png_round_trip() {
    for size in SIZES {
        assert_round_trip(
            png(size),
            (
                ImageFormat::Png,
                EmbedStrategy::Secondary,
                ExtractionStrategyKind::FormatChunks,
                Confidence::High,
            ),
        )
        .await;
    }
}

#[tokio::test]
async fn webp_round_trip() {
    for size in SIZES {
        assert_round_trip(
            webp(size),
            (
                ImageFormat::Webp,
                EmbedStrategy::Primary,
                ExtractionStrategyKind::DescriptiveMetadata,
                Confidence::Medium,
            ),
        )
        .await;
    }
}

#[tokio::test]
async fn resigning_same_content_reuses_record() {
    let rig = rig(SealConfig::default()).await;
    let image = png(512);

    let first = rig.service.sign_and_embed(&image, [("creator", "Jane")]).await.unwrap();
    let second = rig.service.sign_and_embed(&image, [("creator", "Someone else")]).await.unwrap();

    assert!(first.was_new);
    assert!(!second.was_new);
    assert_eq!(second.proof_id, first.proof_id);
    assert_eq!(second.proof_uri, first.proof_uri);
    assert_eq!(second.signed_bytes, first.signed_bytes);
}

#[tokio::test]
async fn signing_an_already_signed_image_replaces_the_binding() {
    let rig = rig(SealConfig::default()).await;
    let once = rig.service.sign_and_embed(&jpeg(256), [("creator", "Jane")]).await.unwrap();
    let twice = rig
        .service
        .sign_and_embed(&once.signed_bytes, [("creator", "Jane")])
        .await
        .unwrap();
    assert!(twice.was_new);
    assert_ne!(twice.proof_id, once.proof_id);

    let lookup = rig.service.extract_and_lookup(&twice.signed_bytes).await.unwrap();
    assert_eq!(lookup.extraction.proof_uri.as_deref(), Some(twice.proof_uri.as_str()));
    assert_eq!(lookup.record.map(|r| r.proof_id), Some(twice.proof_id));
}

#[tokio::test]
async fn forced_container_failure_is_reported_and_still_extractable() {
    let config = SealConfig {
        // One byte of data per APP11 segment: far over the segment cap.
        jpeg_segment_payload: 5,
        ..SealConfig::default()
    };
    let rig = rig(config).await;

    let signed = rig.service.sign_and_embed(&jpeg(64), [("creator", "Jane")]).await.unwrap();
    assert_eq!(signed.strategy, EmbedStrategy::SecondaryFallbackToPrimary);

    let lookup = rig.service.extract_and_lookup(&signed.signed_bytes).await.unwrap();
    assert!(lookup.extraction.found);
    assert_eq!(
        lookup.extraction.strategy_used,
        Some(ExtractionStrategyKind::DescriptiveMetadata)
    );
    assert!(lookup.extraction.degraded);
    assert!(lookup.record.is_some());
}

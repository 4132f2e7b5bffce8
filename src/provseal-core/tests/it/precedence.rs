//! Which strategy wins when an image carries more than one record.

use provseal_core::config::SealConfig;
use provseal_core::embed::MetadataEmbedder;
use provseal_core::extract::MetadataExtractor;
use provseal_core::types::{Confidence, EmbedStrategy, ExtractionStrategyKind, ImageFormat};

use crate::fixtures::{certificates, jpeg, png, sealed_manifest, webp};

const PROOF_URI: &str = "https://proofs.example.com/abc123";

#[tokio::test]
async fn jpeg_container_box_is_preferred() {
    let config = SealConfig::default();
    let certs = certificates().await;
    let original = jpeg(1024);
    let manifest = sealed_manifest(&config, &certs, &original, &[("creator", "Jane")]).await;

    let embedded = MetadataEmbedder::new(&config)
        .embed(&original, &manifest, PROOF_URI)
        .unwrap();
    assert!(embedded.modified_bytes.len() > original.len());
    assert_eq!(embedded.format_used, ImageFormat::Jpeg);
    assert_eq!(embedded.strategy_used, EmbedStrategy::Secondary);
    assert!(!embedded.is_degraded());
    assert_eq!(
        embedded.size_delta,
        embedded.modified_bytes.len() as i64 - original.len() as i64
    );

    let result = MetadataExtractor::new(&config)
        .extract(&embedded.modified_bytes)
        .unwrap();
    assert!(result.found);
    assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI));
    assert_eq!(result.confidence, Some(Confidence::High));
    assert_eq!(result.strategy_used, Some(ExtractionStrategyKind::ContainerBox));
    assert!(!result.degraded);
    let recovered = result.manifest.unwrap();
    assert_eq!(recovered.assertion("creator"), Some("Jane"));
    assert_eq!(recovered, manifest);
}

#[tokio::test]
async fn jane_abc123_jpeg_reports_container_box_high() {
    let config = SealConfig::default();
    let certs = certificates().await;
    let original = jpeg(2048);
    let manifest = sealed_manifest(&config, &certs, &original, &[("creator", "Jane")]).await;

    let embedded = MetadataEmbedder::new(&config)
        .embed(&original, &manifest, "https://proofs.example.com/abc123")
        .unwrap();
    assert!(embedded.modified_bytes.len() > original.len());

    let result = MetadataExtractor::new(&config)
        .extract(&embedded.modified_bytes)
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["found"], true);
    assert_eq!(json["proof_uri"], "https://proofs.example.com/abc123");
    assert_eq!(json["confidence"], "high");
    assert_eq!(json["strategy_used"], "container-box");
    assert_eq!(
        result.manifest.as_ref().and_then(|m| m.assertion("creator")),
        Some("Jane")
    );
}

#[tokio::test]
async fn png_format_chunks_beat_descriptive_metadata() {
    let config = SealConfig::default();
    let certs = certificates().await;
    let original = png(256);
    let manifest = sealed_manifest(&config, &certs, &original, &[("creator", "Jane")]).await;
    let signed = MetadataEmbedder::new(&config)
        .embed(&original, &manifest, PROOF_URI)
        .unwrap()
        .modified_bytes;

    let result = MetadataExtractor::new(&config).extract(&signed).unwrap();
    assert_eq!(result.strategy_used, Some(ExtractionStrategyKind::FormatChunks));
    assert_eq!(result.confidence, Some(Confidence::High));
    assert_eq!(result.manifest, Some(manifest));
}

#[tokio::test]
async fn lower_threshold_stops_at_first_acceptable_strategy() {
    let config = SealConfig {
        min_extraction_confidence: Confidence::Medium,
        ..SealConfig::default()
    };
    let certs = certificates().await;
    let original = png(256);
    let manifest = sealed_manifest(&config, &certs, &original, &[]).await;
    let signed = MetadataEmbedder::new(&config)
        .embed(&original, &manifest, PROOF_URI)
        .unwrap()
        .modified_bytes;

    // Descriptive metadata runs ahead of the chunk strategy.
    let result = MetadataExtractor::new(&config).extract(&signed).unwrap();
    assert_eq!(
        result.strategy_used,
        Some(ExtractionStrategyKind::DescriptiveMetadata)
    );
    assert_eq!(result.confidence, Some(Confidence::Medium));
    assert!(result.degraded);
    assert_eq!(result.proof_uri.as_deref(), Some(PROOF_URI));
}

#[tokio::test]
async fn webp_without_container_reports_degraded_recovery() {
    let config = SealConfig::default();
    let certs = certificates().await;
    let original = webp(300);
    let manifest = sealed_manifest(&config, &certs, &original, &[("creator", "Jane")]).await;
    let embedded = MetadataEmbedder::new(&config)
        .embed(&original, &manifest, PROOF_URI)
        .unwrap();
    assert_eq!(embedded.strategy_used, EmbedStrategy::Primary);

    let result = MetadataExtractor::new(&config)
        .extract(&embedded.modified_bytes)
        .unwrap();
    assert!(result.found);
    assert_eq!(
        result.strategy_used,
        Some(ExtractionStrategyKind::DescriptiveMetadata)
    );
    assert_eq!(result.confidence, Some(Confidence::Medium));
    assert!(result.degraded);
    let recovered = result.manifest.expect("manifest carried in XMP");
    assert_eq!(recovered.assertion("creator"), Some("Jane"));
}

#[tokio::test]
async fn unsigned_images_report_not_found() {
    let extractor = MetadataExtractor::new(&SealConfig::default());
    for image in [jpeg(64), png(64), webp(64)] {
        let result = extractor.extract(&image).unwrap();
        assert!(!result.found);
        assert!(result.proof_uri.is_none());
        assert!(result.strategy_used.is_none());
        assert!(!result.degraded);
    }
}

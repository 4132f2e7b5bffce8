//! Write-once storage under concurrency, restart and expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use provseal_core::config::SealConfig;
use provseal_core::store::{
    BlockMeanHasher, ContentKey, FilesystemBackend, MemoryBackend, PerceptualHasher, ProofRecord,
    ProofStore, StorageBackend,
};
use provseal_core::ProvenanceService;
use uuid::Uuid;

use crate::fixtures::{certificates, jpeg, png, rig, sealed_manifest, webp};

async fn record(content: &[u8], ttl: Duration) -> ProofRecord {
    let config = SealConfig::default();
    let manifest = sealed_manifest(&config, &certificates().await, content, &[]).await;
    let proof_id = Uuid::new_v4();
    let now = Utc::now();
    ProofRecord {
        proof_id,
        proof_uri: config.proof_uri_for(&proof_id),
        content_key: ContentKey::derive(content, &BlockMeanHasher),
        signature: manifest.signature.clone().unwrap(),
        manifest,
        created_at: now,
        expires_at: now + ttl,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stores_agree_on_one_record() {
    let store = Arc::new(ProofStore::new(
        Arc::new(MemoryBackend::new()),
        &SealConfig::default(),
    ));
    let content = png(300);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let record = record(&content, Duration::hours(1)).await;
        tasks.push(tokio::spawn(async move { store.store(record).await }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.was_new).count(), 1);
    let winner = outcomes[0].proof_id;
    assert!(outcomes.iter().all(|o| o.proof_id == winner));
    assert!(outcomes.iter().all(|o| o.record.proof_id == winner));
    assert_eq!(store.indexed_len(), 1);
}

#[tokio::test]
async fn concurrent_signing_of_same_content_shares_a_proof() {
    let rig = rig(SealConfig::default()).await;
    let image = webp(128);

    let (a, b, c) = tokio::join!(
        rig.service.sign_and_embed(&image, [("creator", "A")]),
        rig.service.sign_and_embed(&image, [("creator", "B")]),
        rig.service.sign_and_embed(&image, [("creator", "C")]),
    );
    let results = [a.unwrap(), b.unwrap(), c.unwrap()];

    assert_eq!(results.iter().filter(|r| r.was_new).count(), 1);
    assert!(results.iter().all(|r| r.proof_uri == results[0].proof_uri));
    assert!(results.iter().all(|r| r.manifest_hash == results[0].manifest_hash));
    assert_eq!(rig.backend.list_keys("record:").await.unwrap().len(), 1);
}

#[tokio::test]
async fn different_content_gets_different_records() {
    let rig = rig(SealConfig::default()).await;
    let a = rig.service.sign_and_embed(&jpeg(100), [("n", "1")]).await.unwrap();
    let b = rig.service.sign_and_embed(&jpeg(101), [("n", "1")]).await.unwrap();
    assert!(a.was_new && b.was_new);
    assert_ne!(a.proof_id, b.proof_id);
    assert_eq!(rig.store.indexed_len(), 2);
}

#[tokio::test]
async fn filesystem_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SealConfig::default();
    let certs = certificates().await;

    let signed = {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(FilesystemBackend::open(dir.path()).await.unwrap());
        let store = Arc::new(ProofStore::new(backend, &config));
        let service = ProvenanceService::new(config.clone(), certs.clone(), store).unwrap();
        service.sign_and_embed(&png(500), [("creator", "Jane")]).await.unwrap()
    };

    let backend: Arc<dyn StorageBackend> =
        Arc::new(FilesystemBackend::open(dir.path()).await.unwrap());
    let store = Arc::new(ProofStore::new(backend, &config));
    assert_eq!(store.init().await.unwrap(), 1);
    assert_eq!(store.indexed_len(), 1);

    let service = ProvenanceService::new(config, certs, store.clone()).unwrap();
    let lookup = service.extract_and_lookup(&signed.signed_bytes).await.unwrap();
    let record = lookup.record.expect("record found after restart");
    assert_eq!(record.proof_id, signed.proof_id);
    assert_eq!(record.proof_uri, signed.proof_uri);

    let again = service.sign_and_embed(&png(500), [("creator", "Jane")]).await.unwrap();
    assert!(!again.was_new);
    assert_eq!(again.proof_id, signed.proof_id);
}

/// Wide fingerprint under a long name: stretches the storage key.
struct WideDigestHasher;

impl PerceptualHasher for WideDigestHasher {
    fn name(&self) -> &'static str {
        "perceptual-dct-256-with-a-long-name"
    }

    fn hash(&self, bytes: &[u8]) -> String {
        let narrow = BlockMeanHasher.hash(bytes);
        narrow.repeat(16)
    }
}

#[tokio::test]
async fn filesystem_store_accepts_long_content_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = SealConfig::default();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(FilesystemBackend::open(dir.path()).await.unwrap());
    let store = Arc::new(ProofStore::new(backend.clone(), &config));
    let service = ProvenanceService::new(config, certificates().await, store.clone())
        .unwrap()
        .with_hasher(Box::new(WideDigestHasher));

    let image = jpeg(300);
    let signed = service.sign_and_embed(&image, [("creator", "Jane")]).await.unwrap();
    assert!(signed.was_new);

    let keys = backend.list_keys("record:").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].len() > 255);

    let lookup = service.extract_and_lookup(&signed.signed_bytes).await.unwrap();
    let record = lookup.record.expect("record resolved");
    assert_eq!(record.proof_id, signed.proof_id);
    assert!(record
        .content_key
        .perceptual
        .starts_with("perceptual-dct-256-with-a-long-name:"));

    let again = service.sign_and_embed(&image, [("creator", "Jane")]).await.unwrap();
    assert!(!again.was_new);
    assert_eq!(again.proof_id, signed.proof_id);
}

#[tokio::test]
async fn expired_records_are_swept_and_replaced() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let store = ProofStore::new(backend.clone(), &SealConfig::default());
    let content = jpeg(40);

    let stale = record(&content, Duration::seconds(-1)).await;
    let stale_id = stale.proof_id;
    store.store(stale.clone()).await.unwrap();
    let live = record(&jpeg(41), Duration::hours(1)).await;
    store.store(live.clone()).await.unwrap();

    assert!(store.get(&stale.content_key).await.unwrap().is_none());
    assert!(store.get_by_proof_id(&stale_id).await.unwrap().is_none());

    assert_eq!(store.sweep_expired().await.unwrap(), 1);
    assert_eq!(store.indexed_len(), 1);
    assert_eq!(backend.list_keys("record:").await.unwrap().len(), 1);
    assert!(backend
        .get(&format!("proof:{stale_id}"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        store.get_by_proof_id(&live.proof_id).await.unwrap().map(|r| r.proof_id),
        Some(live.proof_id)
    );

    let replacement = record(&content, Duration::hours(1)).await;
    let outcome = store.store(replacement.clone()).await.unwrap();
    assert!(outcome.was_new);
    assert_eq!(outcome.proof_id, replacement.proof_id);
}

#[tokio::test]
async fn sweep_covers_records_written_by_another_instance() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let sweeper = ProofStore::new(backend.clone(), &SealConfig::default());
    assert_eq!(sweeper.init().await.unwrap(), 0);

    let writer = ProofStore::new(backend.clone(), &SealConfig::default());
    let stale = record(&png(90), Duration::seconds(-1)).await;
    writer.store(stale.clone()).await.unwrap();
    writer.store(record(&png(91), Duration::hours(1)).await).await.unwrap();

    assert_eq!(sweeper.sweep_expired().await.unwrap(), 1);
    assert_eq!(sweeper.indexed_len(), 1);
    assert_eq!(backend.list_keys("record:").await.unwrap().len(), 1);
    assert!(backend
        .get(&format!("proof:{}", stale.proof_id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn service_start_and_shutdown_manage_background_tasks() {
    let rig = rig(SealConfig::default()).await;
    rig.service.start().await.unwrap();
    assert!(rig.store.is_sweeper_running());
    assert!(rig.certificates.is_scheduler_running());

    rig.service.shutdown().await;
    assert!(!rig.store.is_sweeper_running());
    assert!(!rig.certificates.is_scheduler_running());
}

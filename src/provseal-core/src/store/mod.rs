//! Content-addressed, write-once proof storage.
//!
//! Records live in a [`StorageBackend`] under `record:<content key>`, with
//! an alias `proof:<proof id>` pointing back at the record key. A bounded
//! [`RecordCache`] sits in front of the backend and an in-memory index of
//! `proof id -> (record key, expiry)` drives lookups by id and the expiry
//! sweep.
//!
//! Writes for one content key are serialized by a per-key async lock and
//! land through [`StorageBackend::put_if_absent`], so concurrent stores of
//! the same content agree on a single record even across processes that
//! share a backend.

pub mod backend;
pub mod cache;
pub mod record;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SealConfig;
use crate::error::{ProvenanceError, Result};

pub use backend::{FilesystemBackend, MemoryBackend, StorageBackend};
pub use cache::RecordCache;
pub use record::{BlockMeanHasher, ContentKey, PerceptualHasher, ProofRecord};

const RECORD_PREFIX: &str = "record:";
const ALIAS_PREFIX: &str = "proof:";

fn record_key(content_key: &ContentKey) -> String {
    format!("{RECORD_PREFIX}{}", content_key.storage_key())
}

fn alias_key(proof_id: &Uuid) -> String {
    format!("{ALIAS_PREFIX}{proof_id}")
}

/// Result of [`ProofStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Id of the persisted record; the winner's id for a losing writer.
    pub proof_id: Uuid,
    /// Whether this call created the record.
    pub was_new: bool,
    /// The persisted record.
    pub record: ProofRecord,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    record_key: String,
    expires_at: DateTime<Utc>,
}

struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Write-once proof store.
pub struct ProofStore {
    backend: Arc<dyn StorageBackend>,
    cache: RecordCache,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    index: RwLock<HashMap<Uuid, IndexEntry>>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ProofStore {
    /// Store over `backend` with cache and sweep settings from `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, config: &SealConfig) -> Self {
        Self {
            backend,
            cache: RecordCache::new(config.cache_capacity, config.cache_ttl),
            key_locks: Mutex::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            sweep_interval: config.sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Backend in use.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Rebuild the id/expiry index from the backend. Returns the number of
    /// records indexed. Unreadable records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot list its keys.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn init(&self) -> Result<usize> {
        let indexed = self.index_unseen().await?;
        info!(indexed, "ProofStore: index rebuilt");
        Ok(indexed)
    }

    /// Index backend records this instance has not seen, including those
    /// written by other processes sharing the backend.
    async fn index_unseen(&self) -> Result<usize> {
        let keys = self.backend.list_keys(RECORD_PREFIX).await?;
        let known: HashSet<String> = self
            .index
            .read()
            .map(|index| index.values().map(|e| e.record_key.clone()).collect())
            .unwrap_or_default();

        let mut indexed = 0;
        for key in keys.into_iter().filter(|k| !known.contains(k)) {
            match self.load_from_backend(&key).await {
                Ok(Some(record)) => {
                    self.index_insert(&key, &record);
                    indexed += 1;
                },
                Ok(None) => {},
                Err(e) => warn!(key = %key, "ProofStore: skipping unreadable record: {}", e),
            }
        }
        Ok(indexed)
    }

    /// Persist `record` unless a live record for its content key exists.
    ///
    /// A concurrent or earlier writer's record wins; this call then returns
    /// that record with `was_new = false`. An expired record is replaced.
    ///
    /// # Errors
    ///
    /// Returns error on backend or serialization failure.
    #[instrument(skip_all, fields(proof_id = %record.proof_id))]
    pub async fn store(&self, record: ProofRecord) -> Result<StoreOutcome> {
        let key = record_key(&record.content_key);
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.store_locked(&key, record).await
        };
        drop(lock);
        self.release_key_lock(&key);
        outcome
    }

    async fn store_locked(&self, key: &str, record: ProofRecord) -> Result<StoreOutcome> {
        if let Some(existing) = self.load(key).await? {
            if !existing.is_expired_at(Utc::now()) {
                debug!(existing = %existing.proof_id, "ProofStore: record exists");
                return Ok(StoreOutcome {
                    proof_id: existing.proof_id,
                    was_new: false,
                    record: existing,
                });
            }
            info!(expired = %existing.proof_id, "ProofStore: replacing expired record");
            self.remove(key, &existing).await?;
        }

        let bytes = serde_json::to_vec(&record)?;
        if !self.backend.put_if_absent(key, &bytes).await? {
            // Another process sharing the backend won.
            let winner = self
                .load_from_backend(key)
                .await?
                .ok_or_else(|| ProvenanceError::storage("record vanished after write conflict"))?;
            self.cache.insert(key, winner.clone());
            self.index_insert(key, &winner);
            return Ok(StoreOutcome {
                proof_id: winner.proof_id,
                was_new: false,
                record: winner,
            });
        }

        self.backend
            .put(&alias_key(&record.proof_id), key.as_bytes())
            .await?;
        self.index_insert(key, &record);
        self.cache.insert(key, record.clone());
        info!(
            proof_id = %record.proof_id,
            was_new = true,
            expires_at = %record.expires_at,
            "ProofStore: stored record"
        );
        Ok(StoreOutcome {
            proof_id: record.proof_id,
            was_new: true,
            record,
        })
    }

    /// Live record for `content_key`: cache first, then the backend.
    ///
    /// # Errors
    ///
    /// Returns error on backend failure or an unreadable record.
    pub async fn get(&self, content_key: &ContentKey) -> Result<Option<ProofRecord>> {
        let record = self.load(&record_key(content_key)).await?;
        Ok(record.filter(|r| !r.is_expired_at(Utc::now())))
    }

    /// Live record with `proof_id`.
    ///
    /// # Errors
    ///
    /// Returns error on backend failure or an unreadable record.
    pub async fn get_by_proof_id(&self, proof_id: &Uuid) -> Result<Option<ProofRecord>> {
        let indexed = self
            .index
            .read()
            .ok()
            .and_then(|index| index.get(proof_id).map(|e| e.record_key.clone()));
        let key = match indexed {
            Some(key) => key,
            None => match self.backend.get(&alias_key(proof_id)).await? {
                Some(bytes) => String::from_utf8(bytes)
                    .map_err(|_| ProvenanceError::storage("proof alias is not UTF-8"))?,
                None => return Ok(None),
            },
        };

        let record = self.load(&key).await?;
        Ok(record.filter(|r| r.proof_id == *proof_id && !r.is_expired_at(Utc::now())))
    }

    /// Remove every record that expired before now. Returns the count.
    ///
    /// Records other writers added to the backend since the last pass are
    /// indexed first, so they are swept too.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; records handled before it stay
    /// removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<usize> {
        let discovered = self.index_unseen().await?;
        if discovered > 0 {
            debug!(discovered, "ProofStore: indexed records from shared backend");
        }

        let now = Utc::now();
        let expired: Vec<(Uuid, String)> = self
            .index
            .read()
            .map(|index| {
                index
                    .iter()
                    .filter(|(_, e)| e.expires_at < now)
                    .map(|(id, e)| (*id, e.record_key.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut removed = 0;
        for (proof_id, key) in expired {
            let lock = self.key_lock(&key);
            let result = {
                let _guard = lock.lock().await;
                self.sweep_one(&key, proof_id, now).await
            };
            drop(lock);
            self.release_key_lock(&key);
            if result? {
                removed += 1;
            }
        }

        self.cache.remove_where(|r| r.is_expired_at(now));
        if removed > 0 {
            info!(removed, "ProofStore: swept expired records");
        }
        Ok(removed)
    }

    async fn sweep_one(&self, key: &str, proof_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        match self.load_from_backend(key).await? {
            Some(record) if record.proof_id == proof_id && record.is_expired_at(now) => {
                self.remove(key, &record).await?;
                Ok(true)
            },
            // Replaced since indexing; only the stale index entry goes.
            _ => {
                self.index_remove(&proof_id);
                Ok(false)
            },
        }
    }

    /// Start the periodic expiry sweep. The task holds only a weak
    /// reference; dropping the last [`Arc`] ends it as well.
    ///
    /// # Errors
    ///
    /// Returns error if a sweeper is already running or no tokio runtime is
    /// available.
    pub fn start_sweeper(self: &Arc<Self>) -> Result<()> {
        let period = self.sweep_interval;
        if period.is_zero() {
            return Err(ProvenanceError::config("sweep interval must be non-zero"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProvenanceError::storage(format!("no tokio runtime: {e}")))?;

        let mut slot = self
            .sweeper
            .lock()
            .map_err(|_| ProvenanceError::storage("sweeper lock poisoned"))?;
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Err(ProvenanceError::storage("expiry sweeper already running"));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(store) = weak.upgrade() else { break };
                        if let Err(e) = store.sweep_expired().await {
                            warn!("ProofStore: sweep failed: {}", e);
                        }
                    }
                }
            }
            debug!("ProofStore: sweeper stopped");
        });

        *slot = Some(Sweeper {
            shutdown_tx,
            handle,
        });
        info!(interval_secs = period.as_secs(), "ProofStore: sweeper started");
        Ok(())
    }

    /// Whether the sweeper task is alive.
    #[must_use]
    pub fn is_sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|s| s.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown_tx.send(true);
            if let Err(e) = sweeper.handle.await {
                if !e.is_cancelled() {
                    error!("ProofStore: sweeper task failed: {}", e);
                }
            }
        }
    }

    async fn load(&self, key: &str) -> Result<Option<ProofRecord>> {
        if let Some(record) = self.cache.get(key) {
            return Ok(Some(record));
        }
        let record = self.load_from_backend(key).await?;
        if let Some(record) = &record {
            self.cache.insert(key, record.clone());
        }
        Ok(record)
    }

    async fn load_from_backend(&self, key: &str) -> Result<Option<ProofRecord>> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str, record: &ProofRecord) -> Result<()> {
        self.backend.delete(key).await?;
        self.backend.delete(&alias_key(&record.proof_id)).await?;
        self.cache.remove(key);
        self.index_remove(&record.proof_id);
        debug!(proof_id = %record.proof_id, "ProofStore: removed record");
        Ok(())
    }

    fn index_insert(&self, key: &str, record: &ProofRecord) {
        if let Ok(mut index) = self.index.write() {
            index.insert(
                record.proof_id,
                IndexEntry {
                    record_key: key.to_string(),
                    expires_at: record.expires_at,
                },
            );
        }
    }

    fn index_remove(&self, proof_id: &Uuid) {
        if let Ok(mut index) = self.index.write() {
            index.remove(proof_id);
        }
    }

    /// Number of indexed records.
    #[must_use]
    pub fn indexed_len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.key_locks.lock() {
            Ok(mut locks) => locks.entry(key.to_string()).or_default().clone(),
            // A fresh lock still serializes through put_if_absent.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_key_lock(&self, key: &str) {
        if let Ok(mut locks) = self.key_locks.lock() {
            if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(key);
            }
        }
    }
}

impl Drop for ProofStore {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(sweeper) = slot.take() {
                let _ = sweeper.shutdown_tx.send(true);
                sweeper.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn record(content: &[u8], ttl: chrono::Duration) -> ProofRecord {
        let now = Utc::now();
        let proof_id = Uuid::new_v4();
        ProofRecord {
            proof_id,
            proof_uri: format!("https://proofs.example.com/{proof_id}"),
            content_key: ContentKey::derive(content, &BlockMeanHasher),
            manifest: Manifest {
                generator_id: "test".into(),
                instance_id: Uuid::new_v4(),
                created_at: now,
                assertions: Vec::new(),
                content_hash: crate::manifest::sha256_ref(content),
                signature_algorithm: None,
                certificate_ref: None,
                signature: None,
            },
            signature: vec![1, 2, 3],
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn store() -> ProofStore {
        ProofStore::new(Arc::new(MemoryBackend::new()), &SealConfig::default())
    }

    #[tokio::test]
    async fn test_store_is_write_once() {
        let store = store();
        let first = store.store(record(b"img", chrono::Duration::hours(1))).await.unwrap();
        assert!(first.was_new);

        let second = store.store(record(b"img", chrono::Duration::hours(1))).await.unwrap();
        assert!(!second.was_new);
        assert_eq!(second.proof_id, first.proof_id);
    }

    #[tokio::test]
    async fn test_lookup_by_key_and_id() {
        let store = store();
        let rec = record(b"img", chrono::Duration::hours(1));
        let key = rec.content_key.clone();
        let outcome = store.store(rec).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap().map(|r| r.proof_id), Some(outcome.proof_id));
        assert!(store.get_by_proof_id(&outcome.proof_id).await.unwrap().is_some());
        assert!(store.get_by_proof_id(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let store = store();
        let old = store.store(record(b"img", chrono::Duration::seconds(-1))).await.unwrap();
        let new = store.store(record(b"img", chrono::Duration::hours(1))).await.unwrap();
        assert!(new.was_new);
        assert_ne!(new.proof_id, old.proof_id);
        assert!(store.get_by_proof_id(&old.proof_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ProofStore::new(backend.clone(), &SealConfig::default());
        store.store(record(b"old", chrono::Duration::seconds(-1))).await.unwrap();
        let live = store.store(record(b"new", chrono::Duration::hours(1))).await.unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.indexed_len(), 1);
        assert_eq!(backend.list_keys(RECORD_PREFIX).await.unwrap().len(), 1);
        assert_eq!(backend.list_keys(ALIAS_PREFIX).await.unwrap(), vec![alias_key(&live.proof_id)]);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_init_rebuilds_index() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let first = ProofStore::new(backend.clone(), &SealConfig::default());
        first.store(record(b"a", chrono::Duration::hours(1))).await.unwrap();
        first.store(record(b"b", chrono::Duration::seconds(-1))).await.unwrap();

        let second = ProofStore::new(backend, &SealConfig::default());
        assert_eq!(second.init().await.unwrap(), 2);
        assert_eq!(second.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_stops() {
        let config = SealConfig {
            sweep_interval: Duration::from_millis(20),
            ..SealConfig::default()
        };
        let store = Arc::new(ProofStore::new(Arc::new(MemoryBackend::new()), &config));
        store.store(record(b"old", chrono::Duration::seconds(-1))).await.unwrap();

        store.start_sweeper().unwrap();
        assert!(store.start_sweeper().is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.indexed_len(), 0);

        store.shutdown().await;
        assert!(!store.is_sweeper_running());
    }
}

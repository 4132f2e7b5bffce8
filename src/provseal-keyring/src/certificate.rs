//! Certificate lifecycle management.
//!
//! The [`CertificateManager`] owns the active signing certificate, hands out
//! scoped [`KeyHandle`]s, and renews the certificate through its
//! [`KeySource`] when remaining validity drops below a threshold.
//!
//! Rotation never takes signing offline: until renewal succeeds the previous
//! certificate stays active, and failures are recorded rather than returned
//! to signing callers.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::KeyringError;
use crate::handle::KeyHandle;
use crate::source::KeySource;
use crate::types::{duration_secs, CertificateInfo, CertificatePhase, KeyContext};

/// Rotation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// How often the scheduler checks remaining validity.
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
    /// Renew once remaining validity drops below this.
    #[serde(with = "duration_secs")]
    pub renew_before: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            renew_before: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
        }
    }
}

/// Result of one rotation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Remaining validity is above the threshold.
    NotDue {
        /// Remaining validity.
        remaining: chrono::Duration,
    },
    /// Another check is already renewing.
    InProgress,
    /// The certificate was replaced.
    Rotated {
        /// Fingerprint of the retired certificate.
        previous: String,
        /// Fingerprint of the new certificate.
        current: String,
    },
    /// Renewal failed; the previous certificate is still active.
    Failed {
        /// Failure description.
        reason: String,
    },
}

#[derive(Debug, Clone)]
struct ActiveCertificate {
    certificate: CertificateInfo,
    phase: CertificatePhase,
}

struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owner of the active signing certificate.
pub struct CertificateManager {
    source: Arc<dyn KeySource>,
    context: KeyContext,
    config: RotationConfig,
    active: RwLock<Option<ActiveCertificate>>,
    rotation_lock: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<String>>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl CertificateManager {
    /// Create an uninitialized manager.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, context: KeyContext, config: RotationConfig) -> Self {
        Self {
            source,
            context,
            config,
            active: RwLock::new(None),
            rotation_lock: tokio::sync::Mutex::new(()),
            last_error: Mutex::new(None),
            scheduler: Mutex::new(None),
        }
    }

    /// Resolve the initial certificate from the key source.
    ///
    /// An already-expired certificate is accepted here so that a renewal can
    /// still replace it; signing refuses it until then.
    ///
    /// # Errors
    ///
    /// Returns error if the key source cannot resolve key material.
    #[instrument(skip(self), fields(source = ?self.source.kind()))]
    pub async fn init(&self) -> Result<CertificateInfo, KeyringError> {
        let material = self.source.resolve_key(&self.context).await?;
        let certificate = material.into_certificate();

        let now = Utc::now();
        if certificate.is_expired_at(now) {
            warn!(
                fingerprint = %certificate.fingerprint,
                not_after = %certificate.not_after,
                "CertificateManager: initial certificate already expired"
            );
        }

        self.set_active(certificate.clone(), self.phase_for(&certificate))?;
        info!(
            fingerprint = %certificate.fingerprint,
            algorithm = %certificate.algorithm,
            not_after = %certificate.not_after,
            "CertificateManager: initialized"
        );
        Ok(certificate)
    }

    /// The active certificate.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NotInitialized`] before [`Self::init`].
    pub fn current_certificate(&self) -> Result<CertificateInfo, KeyringError> {
        self.read_active().map(|a| a.certificate)
    }

    /// Lifecycle phase of the active certificate, if initialized.
    #[must_use]
    pub fn phase(&self) -> Option<CertificatePhase> {
        self.read_active().ok().map(|a| a.phase)
    }

    /// Rotation schedule in use.
    #[must_use]
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Acquire a handle for one signing operation.
    ///
    /// The caller must release the handle once the signature is produced.
    ///
    /// # Errors
    ///
    /// Returns error if the manager is uninitialized, the active certificate
    /// has expired, or the key source fails.
    #[instrument(skip(self))]
    pub async fn signing_key(&self) -> Result<KeyHandle, KeyringError> {
        let active = self.current_certificate()?;
        let now = Utc::now();
        if active.is_expired_at(now) {
            return Err(expired(&active));
        }

        let material = self.source.resolve_key(&self.context).await?;
        let resolved = material.certificate();

        if resolved.fingerprint != active.fingerprint {
            if !resolved.is_valid_at(now) {
                return Err(expired(resolved));
            }
            // Source was rotated out of band; follow it.
            warn!(
                active = %active.fingerprint,
                resolved = %resolved.fingerprint,
                "CertificateManager: key source changed outside rotation, adopting"
            );
            self.set_active(resolved.clone(), self.phase_for(resolved))?;
        }

        debug!(fingerprint = %resolved.fingerprint, "CertificateManager: key handle acquired");
        Ok(KeyHandle::from(material))
    }

    /// Check remaining validity and renew if it is below the threshold.
    ///
    /// Never returns an error: failures are reported in the outcome and via
    /// [`Self::last_rotation_error`].
    #[instrument(skip(self))]
    pub async fn check_rotation(&self) -> RotationOutcome {
        let current = match self.current_certificate() {
            Ok(c) => c,
            Err(e) => return self.record_failure(e.to_string()),
        };

        let remaining = current.remaining(Utc::now());
        if !self.is_due(remaining) {
            let _ = self.set_phase(CertificatePhase::Active);
            return RotationOutcome::NotDue { remaining };
        }

        let Ok(_guard) = self.rotation_lock.try_lock() else {
            return RotationOutcome::InProgress;
        };

        info!(
            fingerprint = %current.fingerprint,
            remaining_secs = remaining.num_seconds(),
            "CertificateManager: rotation due"
        );
        let _ = self.set_phase(CertificatePhase::Rotating);

        let renewed = match self.source.renew(&self.context, &current).await {
            Ok(material) => material.into_certificate(),
            Err(e) => {
                let _ = self.set_phase(CertificatePhase::RotationDue);
                return self.record_failure(e.to_string());
            },
        };

        if !renewed.is_valid_at(Utc::now()) {
            let _ = self.set_phase(CertificatePhase::RotationDue);
            return self.record_failure(format!(
                "renewed certificate {} is not currently valid",
                renewed.fingerprint
            ));
        }

        let phase = self.phase_for(&renewed);
        if let Err(e) = self.set_active(renewed.clone(), phase) {
            return self.record_failure(e.to_string());
        }
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }

        info!(
            previous = %current.fingerprint,
            current = %renewed.fingerprint,
            not_after = %renewed.not_after,
            "CertificateManager: rotated certificate"
        );
        RotationOutcome::Rotated {
            previous: current.fingerprint,
            current: renewed.fingerprint,
        }
    }

    /// Most recent rotation failure, cleared by a successful rotation.
    #[must_use]
    pub fn last_rotation_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Start the periodic rotation check.
    ///
    /// The task holds only a weak reference, so dropping the last `Arc`
    /// ends it as well.
    ///
    /// # Errors
    ///
    /// Returns error if a scheduler is already running, the check interval
    /// is zero, or no tokio runtime is available.
    pub fn start_rotation_scheduler(self: &Arc<Self>) -> Result<(), KeyringError> {
        let period = self.config.check_interval;
        if period.is_zero() {
            return Err(KeyringError::Scheduler {
                reason: "check interval must be non-zero".to_string(),
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            KeyringError::Scheduler {
                reason: format!("no tokio runtime: {e}"),
            }
        })?;

        let mut slot = self.scheduler.lock().map_err(|_| KeyringError::Scheduler {
            reason: "scheduler lock poisoned".to_string(),
        })?;
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Err(KeyringError::Scheduler {
                reason: "rotation scheduler already running".to_string(),
            });
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        let outcome = manager.check_rotation().await;
                        debug!(?outcome, "CertificateManager: scheduled rotation check");
                    }
                }
            }
            debug!("CertificateManager: rotation scheduler stopped");
        });

        *slot = Some(Scheduler {
            shutdown_tx,
            handle,
        });
        info!(
            interval_secs = period.as_secs(),
            renew_before_secs = self.config.renew_before.as_secs(),
            "CertificateManager: rotation scheduler started"
        );
        Ok(())
    }

    /// Whether the rotation scheduler task is alive.
    #[must_use]
    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .map(|s| s.as_ref().is_some_and(|s| !s.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the rotation scheduler and wait for its task to finish.
    pub async fn stop(&self) {
        let scheduler = match self.scheduler.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(scheduler) = scheduler {
            let _ = scheduler.shutdown_tx.send(true);
            if let Err(e) = scheduler.handle.await {
                if !e.is_cancelled() {
                    error!("CertificateManager: rotation task failed: {}", e);
                }
            }
        }
    }

    fn is_due(&self, remaining: chrono::Duration) -> bool {
        match chrono::Duration::from_std(self.config.renew_before) {
            Ok(threshold) => remaining <= threshold,
            Err(_) => true,
        }
    }

    fn phase_for(&self, certificate: &CertificateInfo) -> CertificatePhase {
        if self.is_due(certificate.remaining(Utc::now())) {
            CertificatePhase::RotationDue
        } else {
            CertificatePhase::Active
        }
    }

    fn read_active(&self) -> Result<ActiveCertificate, KeyringError> {
        self.active
            .read()
            .map_err(|_| KeyringError::unavailable("certificate state lock poisoned"))?
            .clone()
            .ok_or(KeyringError::NotInitialized)
    }

    fn set_active(
        &self,
        certificate: CertificateInfo,
        phase: CertificatePhase,
    ) -> Result<(), KeyringError> {
        let mut active = self
            .active
            .write()
            .map_err(|_| KeyringError::unavailable("certificate state lock poisoned"))?;
        *active = Some(ActiveCertificate { certificate, phase });
        Ok(())
    }

    fn set_phase(&self, phase: CertificatePhase) -> Result<(), KeyringError> {
        let mut active = self
            .active
            .write()
            .map_err(|_| KeyringError::unavailable("certificate state lock poisoned"))?;
        match active.as_mut() {
            Some(a) => {
                a.phase = phase;
                Ok(())
            },
            None => Err(KeyringError::NotInitialized),
        }
    }

    fn record_failure(&self, reason: String) -> RotationOutcome {
        warn!(reason = %reason, "CertificateManager: rotation failed, keeping current certificate");
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(reason.clone());
        }
        RotationOutcome::Failed { reason }
    }
}

impl Drop for CertificateManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.scheduler.lock() {
            if let Some(scheduler) = slot.take() {
                let _ = scheduler.shutdown_tx.send(true);
                scheduler.handle.abort();
            }
        }
    }
}

fn expired(certificate: &CertificateInfo) -> KeyringError {
    KeyringError::CertificateExpired {
        fingerprint: certificate.fingerprint.clone(),
        not_after: certificate.not_after.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeral::EphemeralKeySource;
    use crate::file::{FileKeySource, KeyFile};
    use provseal_crypto::SignatureAlgorithm;

    fn config(renew_before_hours: u64) -> RotationConfig {
        RotationConfig {
            check_interval: Duration::from_millis(10),
            renew_before: Duration::from_secs(renew_before_hours * 3600),
        }
    }

    fn ephemeral(validity_hours: i64) -> Arc<dyn KeySource> {
        Arc::new(
            EphemeralKeySource::generate(
                SignatureAlgorithm::Ed25519,
                "test",
                chrono::Duration::hours(validity_hours),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_uninitialized() {
        let manager = CertificateManager::new(ephemeral(24), KeyContext::default(), config(1));
        assert!(matches!(
            manager.current_certificate(),
            Err(KeyringError::NotInitialized)
        ));
        assert!(manager.signing_key().await.is_err());
        assert_eq!(manager.phase(), None);
    }

    #[tokio::test]
    async fn test_signing_key_matches_certificate() {
        let manager = CertificateManager::new(ephemeral(24), KeyContext::default(), config(1));
        let cert = manager.init().await.unwrap();
        assert_eq!(manager.phase(), Some(CertificatePhase::Active));

        let handle = manager.signing_key().await.unwrap();
        assert_eq!(handle.fingerprint(), cert.fingerprint);
        handle.release();
    }

    #[tokio::test]
    async fn test_not_due() {
        let manager = CertificateManager::new(ephemeral(24 * 30), KeyContext::default(), config(24));
        manager.init().await.unwrap();
        assert!(matches!(
            manager.check_rotation().await,
            RotationOutcome::NotDue { .. }
        ));
    }

    #[tokio::test]
    async fn test_rotation_replaces_certificate() {
        // 1h validity with a 2h threshold is always due.
        let manager = CertificateManager::new(ephemeral(1), KeyContext::default(), config(2));
        let first = manager.init().await.unwrap();
        assert_eq!(manager.phase(), Some(CertificatePhase::RotationDue));

        match manager.check_rotation().await {
            RotationOutcome::Rotated { previous, current } => {
                assert_eq!(previous, first.fingerprint);
                assert_ne!(current, first.fingerprint);
                assert_eq!(manager.current_certificate().unwrap().fingerprint, current);
            },
            other => panic!("expected rotation, got {other:?}"),
        }
        assert!(manager.last_rotation_error().is_none());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        KeyFile::generate(
            SignatureAlgorithm::Ed25519,
            "file",
            chrono::Duration::hours(1),
        )
        .unwrap()
        .save(&path)
        .await
        .unwrap();

        let manager = CertificateManager::new(
            Arc::new(FileKeySource::new(&path)),
            KeyContext::default(),
            config(2),
        );
        let first = manager.init().await.unwrap();

        let outcome = manager.check_rotation().await;
        assert!(matches!(outcome, RotationOutcome::Failed { .. }));
        assert_eq!(
            manager.current_certificate().unwrap().fingerprint,
            first.fingerprint
        );
        assert_eq!(manager.phase(), Some(CertificatePhase::RotationDue));
        assert!(manager.last_rotation_error().is_some());

        // Signing is unaffected.
        let handle = manager.signing_key().await.unwrap();
        assert_eq!(handle.fingerprint(), first.fingerprint);
    }

    #[tokio::test]
    async fn test_expired_certificate_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        let mut key_file =
            KeyFile::generate(SignatureAlgorithm::EcdsaP256, "old", chrono::Duration::hours(1))
                .unwrap();
        key_file.not_before = Utc::now() - chrono::Duration::days(2);
        key_file.not_after = Utc::now() - chrono::Duration::days(1);
        key_file.save(&path).await.unwrap();

        let manager = CertificateManager::new(
            Arc::new(FileKeySource::new(&path)),
            KeyContext::default(),
            config(2),
        );
        manager.init().await.unwrap();
        assert!(matches!(
            manager.signing_key().await,
            Err(KeyringError::CertificateExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_scheduler_rotates_and_stops() {
        let manager = Arc::new(CertificateManager::new(
            ephemeral(1),
            KeyContext::default(),
            config(2),
        ));
        let first = manager.init().await.unwrap();

        manager.start_rotation_scheduler().unwrap();
        assert!(manager.is_scheduler_running());
        assert!(manager.start_rotation_scheduler().is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.stop().await;
        assert!(!manager.is_scheduler_running());

        assert_ne!(
            manager.current_certificate().unwrap().fingerprint,
            first.fingerprint
        );
    }

    #[test]
    fn test_rotation_config_from_json() {
        let cfg: RotationConfig =
            serde_json::from_str(r#"{"check_interval": 30, "renew_before": 3600}"#).unwrap();
        assert_eq!(cfg.check_interval, Duration::from_secs(30));
        assert_eq!(cfg.renew_before, Duration::from_secs(3600));

        let defaults: RotationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, RotationConfig::default());
    }
}

//! Application facade for the offline layer.
//!
//! `OfflineManager` owns every service explicitly (store, encryption,
//! network monitor, sync engine, failure recovery) along with the
//! background tasks that drive them. Producers (capture pipelines, submission
//! flow) and observers (status UI) only ever talk to this facade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use invigil_backend::BackendClient;
use invigil_common::{Error, RecordId, Result};
use invigil_crypto::EncryptionService;
use invigil_store::{
    Answer, FocusChange, Keystroke, MouseClick, OfflineSubmission, ProctoringLog, StorageStats,
    Store,
};
use invigil_sync::{
    FailureQueue, FailureRecoveryManager, FailureReport, NetworkMonitor, NetworkStatus,
    SyncEngine, SyncOutcome, SyncProgress,
};

use crate::config::OfflineConfig;

/// Database file name under the data directory.
pub const DB_FILENAME: &str = "invigil.db";

/// Root facade over the offline resilience layer.
pub struct OfflineManager<B: BackendClient + ?Sized> {
    store: Store,
    crypto: EncryptionService,
    monitor: Arc<NetworkMonitor<B>>,
    engine: Arc<SyncEngine<B>>,
    recovery: Arc<FailureRecoveryManager<B>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<B: BackendClient + ?Sized + 'static> OfflineManager<B> {
    /// Open the offline layer rooted at `data_dir`.
    ///
    /// Creates the directory and the local database on first use.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        backend: Arc<B>,
        config: OfflineConfig,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await.map_err(Error::Io)?;

        let store = Store::open(data_dir.join(DB_FILENAME)).await?;
        Ok(Self::with_store(store, backend, config))
    }

    /// Assemble the layer over an already opened store.
    pub fn with_store(store: Store, backend: Arc<B>, config: OfflineConfig) -> Self {
        let crypto = EncryptionService::new(Arc::new(store.clone()), config.encryption_enabled);
        let monitor = Arc::new(NetworkMonitor::new(backend.clone(), config.monitor.clone()));
        let failures = FailureQueue::new(store.clone(), &config.recovery);

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            backend,
            crypto.clone(),
            monitor.subscribe(),
            failures.clone(),
            config.sync.clone(),
        ));
        let recovery = Arc::new(FailureRecoveryManager::new(
            failures,
            engine.clone(),
            monitor.subscribe(),
            config.recovery.clone(),
        ));

        Self {
            store,
            crypto,
            monitor,
            engine,
            recovery,
            tasks: Vec::new(),
        }
    }

    /// Resolve the platform-default data directory.
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("invigil"))
            .ok_or_else(|| {
                Error::InvalidInput("No platform data directory available".to_string())
            })
    }

    /// Spawn the background loops: periodic probing, reconnect-triggered
    /// sync, automatic failure recovery.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        self.tasks.push(tokio::spawn(self.monitor.clone().run()));
        self.tasks
            .push(tokio::spawn(self.engine.clone().run_reconnect_loop()));
        self.tasks.push(tokio::spawn(self.recovery.clone().run()));
        info!("Offline layer started");
    }

    /// Stop the background loops. Stored records are unaffected.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Offline layer stopped");
    }

    // ---- producer API ----

    /// Whether producers should take the offline path right now.
    pub fn should_store_offline(&self) -> bool {
        self.monitor.is_offline_mode()
    }

    /// Same condition, queried by the submission flow.
    pub fn should_store_submission_offline(&self) -> bool {
        self.should_store_offline()
    }

    /// Encrypt and store one webcam capture.
    pub async fn save_webcam_photo(
        &self,
        submission_id: i64,
        media: &[u8],
        taken_at: DateTime<Utc>,
    ) -> Result<RecordId> {
        let (data, encrypted) = self.crypto.encrypt_media(media).await?;
        let log = ProctoringLog::webcam_photo(submission_id, data, encrypted, taken_at);
        self.store.insert_log(&log).await?;
        Ok(log.id)
    }

    /// Encrypt and store one screenshot.
    pub async fn save_screenshot(
        &self,
        submission_id: i64,
        media: &[u8],
        taken_at: DateTime<Utc>,
    ) -> Result<RecordId> {
        let (data, encrypted) = self.crypto.encrypt_media(media).await?;
        let log = ProctoringLog::screenshot(submission_id, data, encrypted, taken_at);
        self.store.insert_log(&log).await?;
        Ok(log.id)
    }

    /// Store a batch of focus-change events, one record per event.
    pub async fn save_focus_changes(
        &self,
        submission_id: i64,
        events: Vec<FocusChange>,
    ) -> Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let log = ProctoringLog::focus_change(submission_id, event);
            self.store.insert_log(&log).await?;
            ids.push(log.id);
        }
        Ok(ids)
    }

    /// Store a batch of mouse-click events, one record per event.
    pub async fn save_mouse_clicks(
        &self,
        submission_id: i64,
        events: Vec<MouseClick>,
    ) -> Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let log = ProctoringLog::mouse_click(submission_id, event);
            self.store.insert_log(&log).await?;
            ids.push(log.id);
        }
        Ok(ids)
    }

    /// Store a batch of keystroke events, one record per event.
    pub async fn save_keystrokes(
        &self,
        submission_id: i64,
        events: Vec<Keystroke>,
    ) -> Result<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let log = ProctoringLog::keystroke(submission_id, event);
            self.store.insert_log(&log).await?;
            ids.push(log.id);
        }
        Ok(ids)
    }

    /// Store one pending exam submission.
    ///
    /// # Errors
    /// - `AlreadyExists` if this attempt already has a local submission;
    ///   producers treat that as already saved
    pub async fn save_submission(
        &self,
        submission_id: i64,
        test_id: i64,
        answers: Vec<Answer>,
    ) -> Result<RecordId> {
        let submission = OfflineSubmission::new(submission_id, test_id, answers);
        self.store.insert_submission(&submission).await?;
        Ok(submission.id)
    }

    // ---- status / observation API ----

    /// Current connectivity snapshot.
    pub fn network_status(&self) -> NetworkStatus {
        self.monitor.status()
    }

    /// Subscribe to connectivity changes (current value delivered
    /// immediately).
    pub fn subscribe_network(&self) -> watch::Receiver<NetworkStatus> {
        self.monitor.subscribe()
    }

    /// Current sync progress snapshot.
    pub fn sync_progress(&self) -> SyncProgress {
        self.engine.progress()
    }

    /// Subscribe to sync progress snapshots.
    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.engine.subscribe_progress()
    }

    /// Trigger a sync pass now (no-op result while offline or when a
    /// pass is already running).
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        self.engine.sync_all().await
    }

    /// Counts of stored evidence by type and pending submissions.
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.store.stats().await
    }

    /// Aggregated failure-queue report.
    pub async fn failure_status(&self) -> Result<FailureReport> {
        self.recovery.queue().report(Utc::now()).await
    }

    /// Manually clear the failure queue.
    pub async fn clear_failed_items(&self) -> Result<()> {
        self.recovery.queue().clear().await
    }

    /// Feed a device-level connectivity signal from the host shell.
    pub fn set_device_online(&self, online: bool) {
        self.monitor.set_device_online(online);
    }

    /// Run one reachability probe immediately.
    pub async fn probe_backend(&self) -> bool {
        self.monitor.probe_now().await
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl<B: BackendClient + ?Sized> Drop for OfflineManager<B> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

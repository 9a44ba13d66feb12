//! Core sync engine that drains pending local records to the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use invigil_backend::{AnswerUpload, BackendClient, LogUpload, MediaUpload, SubmissionUpload};
use invigil_common::{Error, LogType, RecordId, RecordKind, Result};
use invigil_crypto::EncryptionService;
use invigil_store::{
    CheckpointStatus, LogPayload, OfflineSubmission, ProctoringLog, Store, SyncCheckpoint,
};

use crate::backoff::{RetryConfig, RetryExecutor};
use crate::monitor::NetworkStatus;
use crate::recovery::FailureQueue;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-record retry policy inside a single sync attempt.
    pub retry: RetryConfig,
    /// How many pending checkpoints to fetch per drain chunk.
    pub batch_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            batch_size: 10,
        }
    }
}

/// Observable snapshot of sync state, published after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    pub total_pending: u64,
    pub total_synced: u64,
    pub total_failed: u64,
    pub currently_syncing: bool,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    pub logs_synced: u64,
    pub submissions_synced: u64,
    pub failed: u64,
}

/// Result of one [`SyncEngine::sync_all`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A full pass ran to completion.
    Completed(SyncStats),
    /// Another pass was already running; nothing was done.
    AlreadyRunning,
    /// Offline mode is active; nothing was done.
    Offline,
}

/// Orchestrates the transfer of pending local records to the backend.
///
/// At most one pass runs at a time, enforced by an atomic guard. Records
/// that exhaust their in-attempt retries are handed to the failure queue
/// for longer-horizon recovery.
pub struct SyncEngine<B: BackendClient + ?Sized> {
    store: Store,
    backend: Arc<B>,
    crypto: EncryptionService,
    status_rx: watch::Receiver<NetworkStatus>,
    progress_tx: watch::Sender<SyncProgress>,
    failures: FailureQueue,
    retry: RetryExecutor,
    config: SyncConfig,
    syncing: AtomicBool,
}

impl<B: BackendClient + ?Sized + 'static> SyncEngine<B> {
    /// Create an engine over its collaborators.
    pub fn new(
        store: Store,
        backend: Arc<B>,
        crypto: EncryptionService,
        status_rx: watch::Receiver<NetworkStatus>,
        failures: FailureQueue,
        config: SyncConfig,
    ) -> Self {
        let retry = RetryExecutor::new(config.retry.clone());
        let (progress_tx, _) = watch::channel(SyncProgress::default());

        Self {
            store,
            backend,
            crypto,
            status_rx,
            progress_tx,
            failures,
            retry,
            config,
            syncing: AtomicBool::new(false),
        }
    }

    /// Whether a sync pass is currently running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> SyncProgress {
        *self.progress_tx.borrow()
    }

    /// Subscribe to progress snapshots.
    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress_tx.subscribe()
    }

    /// The failure queue this engine hands exhausted records to.
    pub fn failure_queue(&self) -> &FailureQueue {
        &self.failures
    }

    /// Drain all pending local records to the backend.
    ///
    /// Returns immediately with a descriptive no-op outcome when offline
    /// mode is active or another pass is already running; a second
    /// concurrent pass is never queued.
    pub async fn sync_all(&self) -> Result<SyncOutcome> {
        if self.status_rx.borrow().is_offline_mode() {
            debug!("Sync requested while offline; skipping");
            return Ok(SyncOutcome::Offline);
        }

        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let _guard = PassGuard { engine: self };

        info!("Starting sync pass");
        self.progress_tx.send_modify(|p| {
            p.currently_syncing = true;
            p.last_sync_attempt = Some(Utc::now());
        });

        let stranded = self.store.reset_syncing_checkpoints().await?;
        if stranded > 0 {
            warn!(count = stranded, "Recovered checkpoints from an interrupted pass");
        }
        self.refresh_pending().await?;

        let mut stats = SyncStats::default();

        // Pending logs, via the checkpoint status index, in chunks.
        // Failed records leave the pending set, so the loop terminates.
        loop {
            let chunk = self
                .store
                .checkpoints_with_status(CheckpointStatus::Pending, self.config.batch_size)
                .await?;
            if chunk.is_empty() {
                break;
            }

            for checkpoint in chunk {
                match self.sync_log_checkpoint(checkpoint).await {
                    Ok(true) => {
                        stats.logs_synced += 1;
                        self.note_record_synced();
                    }
                    Ok(false) => {}
                    Err(_) => {
                        stats.failed += 1;
                        self.note_record_failed();
                    }
                }
            }
        }

        // Unsynced submissions, fetched once and processed sequentially.
        for submission in self.store.unsynced_submissions().await? {
            match self.sync_submission(&submission).await {
                Ok(()) => {
                    stats.submissions_synced += 1;
                    self.note_record_synced();
                }
                Err(_) => {
                    stats.failed += 1;
                    self.note_record_failed();
                }
            }
        }

        info!(
            logs = stats.logs_synced,
            submissions = stats.submissions_synced,
            failed = stats.failed,
            "Sync pass completed"
        );

        Ok(SyncOutcome::Completed(stats))
    }

    /// Retry one failed record outside the main pass.
    ///
    /// Runs the same type-specific upload the pass uses, exactly once
    /// (the retry queue owns the backoff schedule), and shares the
    /// success/removal path.
    ///
    /// # Errors
    /// - `NotFound` if the record no longer exists locally
    pub async fn retry_failed_item(&self, id: RecordId, kind: RecordKind) -> Result<()> {
        match kind {
            RecordKind::Log => {
                let log = self.store.get_log(id).await?.ok_or_else(|| {
                    Error::NotFound(format!("Log {} no longer exists", id))
                })?;

                self.upload_log(&log).await?;
                self.store.remove_synced_log(id).await?;
                self.note_record_synced();
                Ok(())
            }
            RecordKind::Submission => {
                let submission = self.store.get_submission(id).await?.ok_or_else(|| {
                    Error::NotFound(format!("Submission {} no longer exists", id))
                })?;
                if submission.synced {
                    return Ok(());
                }

                self.backend
                    .submit_attempt(&submission_upload(&submission))
                    .await?;
                self.store.mark_submission_synced(id).await?;
                self.note_record_synced();
                Ok(())
            }
        }
    }

    /// Auto-trigger a pass whenever connectivity returns.
    ///
    /// Spawn from the application root; terminates when the monitor is
    /// dropped.
    pub async fn run_reconnect_loop(self: Arc<Self>) {
        let mut rx = self.status_rx.clone();
        let mut was_offline = rx.borrow_and_update().is_offline_mode();

        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let offline = rx.borrow_and_update().is_offline_mode();

            if was_offline && !offline {
                info!("Connectivity restored; triggering sync pass");
                if let Err(err) = self.sync_all().await {
                    error!(error = %err, "Reconnect-triggered sync failed");
                }
            }
            was_offline = offline;
        }
    }

    /// Sync one pending log. Returns true if the record was uploaded and
    /// removed, false for orphan-checkpoint cleanup.
    async fn sync_log_checkpoint(&self, mut checkpoint: SyncCheckpoint) -> Result<bool> {
        let Some(log) = self.store.get_log(checkpoint.log_id).await? else {
            warn!(id = %checkpoint.log_id, "Checkpoint without log; removing");
            self.store.remove_synced_log(checkpoint.log_id).await?;
            return Ok(false);
        };

        checkpoint.mark_syncing();
        self.store.update_checkpoint(&checkpoint).await?;
        debug!(id = %log.id, log_type = %log.log_type, "Syncing log");

        let (result, attempts) = self.retry.execute_counted(|| self.upload_log(&log)).await;

        match result {
            Ok(()) => {
                self.store.remove_synced_log(log.id).await?;
                Ok(true)
            }
            Err(err) => {
                warn!(id = %log.id, error = %err, "Log sync failed; queueing for recovery");
                checkpoint.mark_failed(attempts, err.to_string());
                self.store.update_checkpoint(&checkpoint).await?;
                self.failures
                    .add_failure(log.id, RecordKind::Log, Some(log.log_type), &err, 1)
                    .await?;
                Err(err)
            }
        }
    }

    async fn sync_submission(&self, submission: &OfflineSubmission) -> Result<()> {
        debug!(id = %submission.id, attempt = submission.submission_id, "Syncing submission");
        let upload = submission_upload(submission);

        let result = self
            .retry
            .execute(|| self.backend.submit_attempt(&upload))
            .await;

        match result {
            Ok(()) => {
                self.store.mark_submission_synced(submission.id).await?;
                Ok(())
            }
            Err(err) => {
                warn!(
                    id = %submission.id,
                    error = %err,
                    "Submission sync failed; queueing for recovery"
                );
                self.failures
                    .add_failure(submission.id, RecordKind::Submission, None, &err, 1)
                    .await?;
                Err(err)
            }
        }
    }

    /// Upload one log, type-specifically.
    ///
    /// Media payloads are decrypted in memory (per the record's own
    /// `encrypted` flag), pushed to object storage, and only the
    /// returned reference travels with the ingested metadata. The
    /// decrypted bytes are never persisted.
    async fn upload_log(&self, log: &ProctoringLog) -> Result<()> {
        let upload = match &log.payload {
            LogPayload::Media(capture) => {
                let plaintext = self
                    .crypto
                    .decrypt_media(log.encrypted, &capture.data)
                    .await?;

                let media_ref = self
                    .backend
                    .upload_media(MediaUpload {
                        log_id: log.id,
                        submission_id: log.submission_id,
                        log_type: log.log_type,
                        content_type: media_content_type(log.log_type).to_string(),
                        data: Bytes::from(plaintext),
                    })
                    .await?;

                LogUpload {
                    log_id: log.id,
                    submission_id: log.submission_id,
                    log_type: log.log_type,
                    timestamp: log.timestamp,
                    event: None,
                    media: Some(media_ref),
                    taken_at: Some(capture.taken_at),
                }
            }
            LogPayload::FocusChange(event) => event_log_upload(log, event)?,
            LogPayload::MouseClick(event) => event_log_upload(log, event)?,
            LogPayload::Keystroke(event) => event_log_upload(log, event)?,
        };

        self.backend.ingest_logs(&[upload]).await
    }

    async fn refresh_pending(&self) -> Result<()> {
        let pending = self
            .store
            .count_checkpoints_with_status(CheckpointStatus::Pending)
            .await?
            + self.store.count_unsynced_submissions().await?;

        self.progress_tx.send_modify(|p| p.total_pending = pending);
        Ok(())
    }

    fn note_record_synced(&self) {
        self.progress_tx.send_modify(|p| {
            p.total_synced += 1;
            p.total_pending = p.total_pending.saturating_sub(1);
            p.last_successful_sync = Some(Utc::now());
        });
    }

    fn note_record_failed(&self) {
        self.progress_tx.send_modify(|p| {
            p.total_failed += 1;
            p.total_pending = p.total_pending.saturating_sub(1);
        });
    }
}

/// Clears the single-pass guard and the syncing flag when a pass ends,
/// on every exit path.
struct PassGuard<'a, B: BackendClient + ?Sized> {
    engine: &'a SyncEngine<B>,
}

impl<B: BackendClient + ?Sized> Drop for PassGuard<'_, B> {
    fn drop(&mut self) {
        self.engine.syncing.store(false, Ordering::SeqCst);
        self.engine
            .progress_tx
            .send_modify(|p| p.currently_syncing = false);
    }
}

fn submission_upload(submission: &OfflineSubmission) -> SubmissionUpload {
    SubmissionUpload {
        submission_id: submission.submission_id,
        test_id: submission.test_id,
        answers: submission
            .answers
            .iter()
            .map(|answer| AnswerUpload {
                question_id: answer.question_id,
                answer: answer.answer.clone(),
            })
            .collect(),
        submitted_at: submission.timestamp,
    }
}

fn event_log_upload<T: Serialize>(log: &ProctoringLog, event: &T) -> Result<LogUpload> {
    let event = serde_json::to_value(event)
        .map_err(|e| Error::Serialization(format!("Failed to encode event: {}", e)))?;

    Ok(LogUpload {
        log_id: log.id,
        submission_id: log.submission_id,
        log_type: log.log_type,
        timestamp: log.timestamp,
        event: Some(event),
        media: None,
        taken_at: None,
    })
}

fn media_content_type(log_type: LogType) -> &'static str {
    match log_type {
        LogType::WebcamPhoto => "image/jpeg",
        LogType::Screenshot => "image/png",
        _ => "application/octet-stream",
    }
}

//! Durable retry queue and automatic failure recovery.
//!
//! Records that exhaust their in-attempt retries land here with a
//! persisted wall-clock schedule, so re-attempts survive a full
//! application restart. The automatic loop runs on its own timer,
//! independent of (and yielding to) the main sync pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use invigil_backend::BackendClient;
use invigil_common::{Error, LogType, RecordId, RecordKind, Result};
use invigil_store::{FailedSyncItem, Store};

use crate::backoff::RetryConfig;
use crate::engine::SyncEngine;
use crate::monitor::NetworkStatus;

/// Configuration for the failure recovery manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Interval between automatic retry ticks.
    pub tick_interval: Duration,
    /// Wall-clock age after which a failed item counts as permanent.
    pub permanent_failure_threshold: Duration,
    /// Backoff schedule for queued items.
    pub retry: RetryConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            permanent_failure_threshold: Duration::from_secs(7 * 24 * 60 * 60),
            retry: RetryConfig::default(),
        }
    }
}

/// Aggregated view of the failure queue for UI consumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureReport {
    pub total_failed: usize,
    pub failed_items: Vec<FailedSyncItem>,
    pub retryable_count: usize,
    pub permanent_failures: usize,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Substring classification for call sites where only a reason string
/// survives.
///
/// Authorization/permission/not-found failures are permanent; everything
/// else is considered retryable.
pub fn is_permanent_reason(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    ["unauthorized", "forbidden", "permission", "not found"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Durable, store-backed retry queue with exponential backoff.
#[derive(Clone)]
pub struct FailureQueue {
    store: Store,
    retry: RetryConfig,
    permanent_failure_threshold: Duration,
}

impl FailureQueue {
    /// Create a queue over the local store.
    pub fn new(store: Store, config: &RecoveryConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            permanent_failure_threshold: config.permanent_failure_threshold,
        }
    }

    /// Record a failed sync attempt for a record.
    ///
    /// A new entry classifies retryability once, from the error kind
    /// with the substring rules as fallback, and never recomputes it.
    /// An existing entry is bumped instead: attempt count incremented,
    /// reason refreshed, next retry recomputed; first-failure time and
    /// retryability survive.
    pub async fn add_failure(
        &self,
        id: RecordId,
        kind: RecordKind,
        log_type: Option<LogType>,
        err: &Error,
        attempt_count: u32,
    ) -> Result<()> {
        let now = Utc::now();
        let reason = err.to_string();

        let item = match self.store.get_failed_item(id).await? {
            Some(mut existing) => {
                existing.attempt_count += 1;
                existing.failure_reason = reason;
                existing.last_attempt_time = now;
                existing.next_retry_time =
                    self.retry.next_retry_time(now, existing.attempt_count);
                existing
            }
            None => {
                let attempt_count = attempt_count.max(1);
                let is_retryable = !(err.is_permanent() || is_permanent_reason(&reason));
                FailedSyncItem {
                    id,
                    kind,
                    log_type,
                    failure_reason: reason,
                    attempt_count,
                    first_failure_time: now,
                    last_attempt_time: now,
                    next_retry_time: self.retry.next_retry_time(now, attempt_count),
                    is_retryable,
                }
            }
        };

        debug!(
            id = %id,
            attempts = item.attempt_count,
            retryable = item.is_retryable,
            "Queued failed record"
        );
        self.store.upsert_failed_item(&item).await
    }

    /// Get a queue entry by record id.
    pub async fn get(&self, id: RecordId) -> Result<Option<FailedSyncItem>> {
        self.store.get_failed_item(id).await
    }

    /// Remove a queue entry (successful retry or manual clear).
    pub async fn remove(&self, id: RecordId) -> Result<()> {
        self.store.remove_failed_item(id).await
    }

    /// Drop every queue entry.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_failed_items().await
    }

    /// All retryable entries under the attempt ceiling whose scheduled
    /// retry time has elapsed and whose first failure is younger than
    /// the permanent-failure threshold.
    pub async fn items_ready_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<FailedSyncItem>> {
        let items = self.store.all_failed_items().await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                item.is_retryable
                    && item.attempt_count < self.retry.max_attempts
                    && item.next_retry_time <= now
                    && !self.is_stale(item, now)
            })
            .collect())
    }

    /// Aggregate the queue for UI consumption. Pure read, never mutates.
    ///
    /// Items older than the permanent-failure threshold count as
    /// permanent even when nominally retryable.
    pub async fn report(&self, now: DateTime<Utc>) -> Result<FailureReport> {
        let failed_items = self.store.all_failed_items().await?;

        let permanent_failures = failed_items
            .iter()
            .filter(|item| !item.is_retryable || self.is_stale(item, now))
            .count();
        let last_failure_time = failed_items.iter().map(|item| item.last_attempt_time).max();

        Ok(FailureReport {
            total_failed: failed_items.len(),
            retryable_count: failed_items.len() - permanent_failures,
            permanent_failures,
            last_failure_time,
            failed_items,
        })
    }

    fn is_stale(&self, item: &FailedSyncItem, now: DateTime<Utc>) -> bool {
        let threshold = chrono::Duration::from_std(self.permanent_failure_threshold)
            .unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(item.first_failure_time) >= threshold
    }
}

/// Automatic retry loop, independent of the main sync pass.
pub struct FailureRecoveryManager<B: BackendClient + ?Sized> {
    queue: FailureQueue,
    engine: Arc<SyncEngine<B>>,
    status_rx: watch::Receiver<NetworkStatus>,
    config: RecoveryConfig,
}

impl<B: BackendClient + ?Sized + 'static> FailureRecoveryManager<B> {
    /// Create a manager driving retries through the given engine.
    pub fn new(
        queue: FailureQueue,
        engine: Arc<SyncEngine<B>>,
        status_rx: watch::Receiver<NetworkStatus>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            status_rx,
            config,
        }
    }

    /// The queue this manager drains.
    pub fn queue(&self) -> &FailureQueue {
        &self.queue
    }

    /// One retry tick.
    ///
    /// Skips entirely while offline or while the engine's main pass is
    /// running; retry and sync never race. Otherwise every due item is
    /// re-resolved and re-uploaded through the engine's type-specific
    /// logic.
    pub async fn tick(&self) -> Result<()> {
        if self.status_rx.borrow().is_offline_mode() {
            return Ok(());
        }
        if self.engine.is_syncing() {
            debug!("Yielding retry tick to running sync pass");
            return Ok(());
        }

        let due = self.queue.items_ready_for_retry(Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "Retrying failed records");
        for item in due {
            match self.engine.retry_failed_item(item.id, item.kind).await {
                Ok(()) => {
                    info!(id = %item.id, "Recovered failed record");
                    self.queue.remove(item.id).await?;
                }
                Err(Error::NotFound(_)) => {
                    warn!(id = %item.id, "Record vanished; dropping queue entry");
                    self.queue.remove(item.id).await?;
                }
                Err(err) => {
                    warn!(id = %item.id, error = %err, "Retry failed");
                    self.queue
                        .add_failure(item.id, item.kind, item.log_type, &err, item.attempt_count)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Periodic retry loop; spawn from the application root.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.config.tick_interval, "Failure recovery manager started");

        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                warn!(error = %err, "Recovery tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SyncConfig, SyncEngine};
    use invigil_backend::MockBackend;
    use invigil_crypto::EncryptionService;
    use invigil_store::{FocusChange, ProctoringLog};

    fn test_retry_config() -> RetryConfig {
        RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(2000))
            .with_jitter(false)
    }

    fn test_recovery_config() -> RecoveryConfig {
        RecoveryConfig {
            tick_interval: Duration::from_millis(10),
            permanent_failure_threshold: Duration::from_secs(7 * 24 * 60 * 60),
            retry: test_retry_config(),
        }
    }

    async fn queue() -> (FailureQueue, Store) {
        let store = Store::in_memory().await.unwrap();
        let queue = FailureQueue::new(store.clone(), &test_recovery_config());
        (queue, store)
    }

    #[test]
    fn test_substring_classification() {
        assert!(is_permanent_reason("Unauthorized"));
        assert!(is_permanent_reason("403 Forbidden"));
        assert!(is_permanent_reason("insufficient permission"));
        assert!(is_permanent_reason("Submission not found"));

        assert!(!is_permanent_reason("connection reset"));
        assert!(!is_permanent_reason("HTTP 503"));
        assert!(!is_permanent_reason("timed out"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retryable() {
        let (queue, _store) = queue().await;
        let id = RecordId::generate();

        queue
            .add_failure(
                id,
                RecordKind::Log,
                Some(LogType::Keystroke),
                &Error::TransientSync("HTTP 502".to_string()),
                1,
            )
            .await
            .unwrap();

        let item = queue.get(id).await.unwrap().unwrap();
        assert!(item.is_retryable);
        assert_eq!(item.attempt_count, 1);
        // base 2000ms, attempt 1 => +2s
        assert_eq!(
            item.next_retry_time - item.last_attempt_time,
            chrono::Duration::seconds(2)
        );
    }

    #[tokio::test]
    async fn test_permanent_error_classified_once() {
        let (queue, _store) = queue().await;
        let id = RecordId::generate();

        queue
            .add_failure(
                id,
                RecordKind::Submission,
                None,
                &Error::PermanentSync("Forbidden (403)".to_string()),
                1,
            )
            .await
            .unwrap();

        let item = queue.get(id).await.unwrap().unwrap();
        assert!(!item.is_retryable);

        // A later transient failure must not flip retryability back.
        queue
            .add_failure(
                id,
                RecordKind::Submission,
                None,
                &Error::TransientSync("HTTP 500".to_string()),
                2,
            )
            .await
            .unwrap();

        let item = queue.get(id).await.unwrap().unwrap();
        assert!(!item.is_retryable);
        assert_eq!(item.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_repeat_failure_bumps_schedule() {
        let (queue, _store) = queue().await;
        let id = RecordId::generate();
        let err = Error::TransientSync("HTTP 503".to_string());

        queue
            .add_failure(id, RecordKind::Log, Some(LogType::Screenshot), &err, 1)
            .await
            .unwrap();
        let first = queue.get(id).await.unwrap().unwrap();

        queue
            .add_failure(id, RecordKind::Log, Some(LogType::Screenshot), &err, 1)
            .await
            .unwrap();
        let second = queue.get(id).await.unwrap().unwrap();

        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.first_failure_time, first.first_failure_time);
        // attempt 2 => +4s
        assert_eq!(
            second.next_retry_time - second.last_attempt_time,
            chrono::Duration::seconds(4)
        );
    }

    #[tokio::test]
    async fn test_ready_for_retry_filtering() {
        let (queue, store) = queue().await;
        let now = Utc::now();
        let err = Error::TransientSync("HTTP 503".to_string());

        // Due: scheduled in the past
        let due_id = RecordId::generate();
        queue
            .add_failure(due_id, RecordKind::Log, Some(LogType::Keystroke), &err, 1)
            .await
            .unwrap();
        let mut due = queue.get(due_id).await.unwrap().unwrap();
        due.next_retry_time = now - chrono::Duration::seconds(1);
        store.upsert_failed_item(&due).await.unwrap();

        // Not due yet
        let pending_id = RecordId::generate();
        queue
            .add_failure(pending_id, RecordKind::Log, None, &err, 1)
            .await
            .unwrap();

        // Permanent
        let permanent_id = RecordId::generate();
        queue
            .add_failure(
                permanent_id,
                RecordKind::Submission,
                None,
                &Error::PermanentSync("Unauthorized".to_string()),
                1,
            )
            .await
            .unwrap();

        // Exhausted: at the attempt ceiling
        let exhausted_id = RecordId::generate();
        queue
            .add_failure(exhausted_id, RecordKind::Log, None, &err, 1)
            .await
            .unwrap();
        let mut exhausted = queue.get(exhausted_id).await.unwrap().unwrap();
        exhausted.attempt_count = 5;
        exhausted.next_retry_time = now - chrono::Duration::seconds(1);
        store.upsert_failed_item(&exhausted).await.unwrap();

        // Stale: first failure beyond the threshold
        let stale_id = RecordId::generate();
        queue
            .add_failure(stale_id, RecordKind::Log, None, &err, 1)
            .await
            .unwrap();
        let mut stale = queue.get(stale_id).await.unwrap().unwrap();
        stale.first_failure_time = now - chrono::Duration::days(8);
        stale.next_retry_time = now - chrono::Duration::seconds(1);
        store.upsert_failed_item(&stale).await.unwrap();

        let ready = queue.items_ready_for_retry(now).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due_id);
    }

    #[tokio::test]
    async fn test_report_reclassifies_stale_items() {
        let (queue, store) = queue().await;
        let now = Utc::now();

        queue
            .add_failure(
                RecordId::generate(),
                RecordKind::Log,
                Some(LogType::WebcamPhoto),
                &Error::TransientSync("HTTP 503".to_string()),
                1,
            )
            .await
            .unwrap();
        queue
            .add_failure(
                RecordId::generate(),
                RecordKind::Submission,
                None,
                &Error::PermanentSync("Unauthorized".to_string()),
                1,
            )
            .await
            .unwrap();

        // Nominally retryable but stale
        let stale_id = RecordId::generate();
        queue
            .add_failure(
                stale_id,
                RecordKind::Log,
                None,
                &Error::TransientSync("HTTP 503".to_string()),
                1,
            )
            .await
            .unwrap();
        let mut stale = queue.get(stale_id).await.unwrap().unwrap();
        stale.first_failure_time = now - chrono::Duration::days(8);
        store.upsert_failed_item(&stale).await.unwrap();

        let report = queue.report(now).await.unwrap();
        assert_eq!(report.total_failed, 3);
        assert_eq!(report.permanent_failures, 2);
        assert_eq!(report.retryable_count, 1);
        assert!(report.last_failure_time.is_some());
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let (queue, _store) = queue().await;
        queue
            .add_failure(
                RecordId::generate(),
                RecordKind::Log,
                None,
                &Error::TransientSync("HTTP 503".to_string()),
                1,
            )
            .await
            .unwrap();

        queue.clear().await.unwrap();
        assert_eq!(queue.report(Utc::now()).await.unwrap().total_failed, 0);
    }

    // ---- manager ----

    struct ManagerHarness {
        manager: FailureRecoveryManager<MockBackend>,
        backend: Arc<MockBackend>,
        store: Store,
        status_tx: watch::Sender<NetworkStatus>,
    }

    async fn manager_harness() -> ManagerHarness {
        let store = Store::in_memory().await.unwrap();
        let backend = Arc::new(MockBackend::new());
        let crypto = EncryptionService::new(Arc::new(store.clone()), true);
        let (status_tx, status_rx) = watch::channel(NetworkStatus::default());

        let config = test_recovery_config();
        let queue = FailureQueue::new(store.clone(), &config);
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            backend.clone(),
            crypto,
            status_rx.clone(),
            queue.clone(),
            SyncConfig {
                retry: RetryConfig::new(5)
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(false),
                batch_size: 10,
            },
        ));
        let manager = FailureRecoveryManager::new(queue, engine, status_rx, config);

        ManagerHarness {
            manager,
            backend,
            store,
            status_tx,
        }
    }

    async fn queued_failed_log(h: &ManagerHarness) -> ProctoringLog {
        let log = ProctoringLog::focus_change(
            5,
            FocusChange {
                focused: true,
                target: "exam window".to_string(),
                at: Utc::now(),
            },
        );
        h.store.insert_log(&log).await.unwrap();

        h.manager
            .queue()
            .add_failure(
                log.id,
                RecordKind::Log,
                Some(log.log_type),
                &Error::TransientSync("HTTP 503".to_string()),
                1,
            )
            .await
            .unwrap();

        // Make it due immediately.
        let mut item = h.manager.queue().get(log.id).await.unwrap().unwrap();
        item.next_retry_time = Utc::now() - chrono::Duration::seconds(1);
        h.store.upsert_failed_item(&item).await.unwrap();

        log
    }

    #[tokio::test]
    async fn test_tick_recovers_due_item() {
        let h = manager_harness().await;
        let log = queued_failed_log(&h).await;

        h.manager.tick().await.unwrap();

        assert!(h.manager.queue().get(log.id).await.unwrap().is_none());
        assert!(h.store.get_log(log.id).await.unwrap().is_none());
        assert_eq!(h.backend.ingested_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_while_offline() {
        let h = manager_harness().await;
        let log = queued_failed_log(&h).await;

        h.status_tx.send_modify(|s| s.backend_reachable = false);
        h.manager.tick().await.unwrap();

        assert!(h.manager.queue().get(log.id).await.unwrap().is_some());
        assert_eq!(h.backend.ingest_calls(), 0);
    }

    #[tokio::test]
    async fn test_tick_bumps_schedule_on_repeat_failure() {
        let h = manager_harness().await;
        let log = queued_failed_log(&h).await;

        h.backend.fail_ingest_with(false, "HTTP 503");
        h.manager.tick().await.unwrap();

        let item = h.manager.queue().get(log.id).await.unwrap().unwrap();
        assert_eq!(item.attempt_count, 2);
        assert!(item.next_retry_time > Utc::now());
        assert!(h.store.get_log(log.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tick_drops_entry_for_vanished_record() {
        let h = manager_harness().await;
        let log = queued_failed_log(&h).await;

        // Record deleted out from under the queue.
        h.store.remove_synced_log(log.id).await.unwrap();

        h.manager.tick().await.unwrap();
        assert!(h.manager.queue().get(log.id).await.unwrap().is_none());
    }
}

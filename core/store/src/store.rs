//! Async handle to the versioned local database.
//!
//! Four collections back the offline layer: proctoring logs, offline
//! submissions, sync checkpoints and metadata. All SQL runs on the
//! blocking pool; the connection mutex plus SQLite transactions are the
//! only mutual-exclusion primitives for record mutation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use invigil_common::{Error, LogType, RecordId, Result};
use invigil_crypto::{KeyStore, DEVICE_KEY_METADATA_KEY};

use crate::records::{
    Answer, CheckpointStatus, FailedSyncItem, LogPayload, MediaCapture, OfflineSubmission,
    ProctoringLog, StorageStats, SyncCheckpoint,
};
use crate::schema;

/// Reserved metadata key prefix for durable failure-queue entries.
pub const FAILED_ITEM_PREFIX: &str = "failed/";

/// The four persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    ProctoringLogs,
    OfflineSubmissions,
    SyncCheckpoints,
    Metadata,
}

impl Collection {
    fn table(&self) -> &'static str {
        match self {
            Self::ProctoringLogs => "proctoring_logs",
            Self::OfflineSubmissions => "offline_submissions",
            Self::SyncCheckpoints => "sync_checkpoints",
            Self::Metadata => "metadata",
        }
    }
}

/// Handle to the local database.
///
/// Cheap to clone. Every method is async and runs its SQL on the
/// blocking pool; any SQLite or mapping failure surfaces as
/// [`Error::Storage`] and is never retried here.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating and migrating on first use) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path).map_err(storage_err)?;
            schema::migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(join_err)??;

        info!("Local store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory().map_err(storage_err)?;
            schema::migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(join_err)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Storage("Store mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(join_err)?
    }

    // ---- proctoring logs + checkpoints ----

    /// Persist a log and its pending checkpoint in one transaction.
    ///
    /// If either write fails the whole transaction rolls back, so no log
    /// can exist without a checkpoint.
    pub async fn insert_log(&self, log: &ProctoringLog) -> Result<()> {
        let log = log.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let (payload, media, taken_at) = encode_payload(&log.payload)?;

            tx.execute(
                "INSERT INTO proctoring_logs
                 (id, submission_id, log_type, timestamp, encrypted, payload, media, taken_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    log.id.to_string(),
                    log.submission_id,
                    log.log_type.as_str(),
                    log.timestamp.timestamp_millis(),
                    log.encrypted as i32,
                    payload,
                    media,
                    taken_at,
                ],
            )
            .map_err(storage_err)?;

            let checkpoint = SyncCheckpoint::pending(&log);
            tx.execute(
                "INSERT INTO sync_checkpoints
                 (log_id, log_type, status, attempt_count, last_attempt, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    checkpoint.log_id.to_string(),
                    checkpoint.log_type.as_str(),
                    checkpoint.status.as_str(),
                    checkpoint.attempt_count,
                    checkpoint.last_attempt.map(|t| t.timestamp_millis()),
                    checkpoint.last_error,
                ],
            )
            .map_err(storage_err)?;

            tx.commit().map_err(storage_err)?;
            debug!(id = %log.id, log_type = %log.log_type, "Stored proctoring log");
            Ok(())
        })
        .await
    }

    /// Get a log by id.
    pub async fn get_log(&self, id: RecordId) -> Result<Option<ProctoringLog>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, submission_id, log_type, timestamp, encrypted, payload, media, taken_at
                 FROM proctoring_logs WHERE id = ?1",
                params![id.to_string()],
                read_log_row,
            )
            .optional()
            .map_err(storage_err)?
            .transpose()
        })
        .await
    }

    /// All logs belonging to one exam attempt.
    pub async fn logs_for_submission(&self, submission_id: i64) -> Result<Vec<ProctoringLog>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, submission_id, log_type, timestamp, encrypted, payload, media, taken_at
                     FROM proctoring_logs WHERE submission_id = ?1",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(params![submission_id], read_log_row)
                .map_err(storage_err)?;

            let mut logs = Vec::new();
            for row in rows {
                logs.push(row.map_err(storage_err)??);
            }
            Ok(logs)
        })
        .await
    }

    /// Delete a synced log and its checkpoint in one transaction.
    pub async fn remove_synced_log(&self, id: RecordId) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            tx.execute(
                "DELETE FROM proctoring_logs WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(storage_err)?;
            tx.execute(
                "DELETE FROM sync_checkpoints WHERE log_id = ?1",
                params![id.to_string()],
            )
            .map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;
            debug!(id = %id, "Removed synced log and checkpoint");
            Ok(())
        })
        .await
    }

    /// Get the checkpoint shadowing a log.
    pub async fn checkpoint(&self, log_id: RecordId) -> Result<Option<SyncCheckpoint>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT log_id, log_type, status, attempt_count, last_attempt, last_error
                 FROM sync_checkpoints WHERE log_id = ?1",
                params![log_id.to_string()],
                read_checkpoint_row,
            )
            .optional()
            .map_err(storage_err)?
            .transpose()
        })
        .await
    }

    /// Checkpoints with the given status, up to `limit`, in index order.
    pub async fn checkpoints_with_status(
        &self,
        status: CheckpointStatus,
        limit: u32,
    ) -> Result<Vec<SyncCheckpoint>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT log_id, log_type, status, attempt_count, last_attempt, last_error
                     FROM sync_checkpoints WHERE status = ?1 LIMIT ?2",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(params![status.as_str(), limit], read_checkpoint_row)
                .map_err(storage_err)?;

            let mut checkpoints = Vec::new();
            for row in rows {
                checkpoints.push(row.map_err(storage_err)??);
            }
            Ok(checkpoints)
        })
        .await
    }

    /// Count checkpoints with the given status.
    pub async fn count_checkpoints_with_status(&self, status: CheckpointStatus) -> Result<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sync_checkpoints WHERE status = ?1",
                    params![status.as_str()],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
        .await
    }

    /// Reset checkpoints stranded in `syncing` back to `pending`.
    ///
    /// A pass interrupted mid-record (crash, storage failure) leaves its
    /// checkpoint in `syncing`; the next pass calls this so the record
    /// re-enters the pending set. Returns how many were reset.
    pub async fn reset_syncing_checkpoints(&self) -> Result<u64> {
        self.with_conn(move |conn| {
            let reset = conn
                .execute(
                    "UPDATE sync_checkpoints SET status = ?1 WHERE status = ?2",
                    params![
                        CheckpointStatus::Pending.as_str(),
                        CheckpointStatus::Syncing.as_str()
                    ],
                )
                .map_err(storage_err)?;
            Ok(reset as u64)
        })
        .await
    }

    /// Overwrite a checkpoint with new state.
    pub async fn update_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let checkpoint = checkpoint.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_checkpoints
                 (log_id, log_type, status, attempt_count, last_attempt, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    checkpoint.log_id.to_string(),
                    checkpoint.log_type.as_str(),
                    checkpoint.status.as_str(),
                    checkpoint.attempt_count,
                    checkpoint.last_attempt.map(|t| t.timestamp_millis()),
                    checkpoint.last_error,
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    // ---- offline submissions ----

    /// Persist a pending submission.
    ///
    /// # Errors
    /// - `AlreadyExists` if the attempt already has a local submission
    pub async fn insert_submission(&self, submission: &OfflineSubmission) -> Result<()> {
        let submission = submission.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM offline_submissions WHERE submission_id = ?1",
                    params![submission.submission_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            if existing.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "Offline submission already stored for attempt {}",
                    submission.submission_id
                )));
            }

            let answers = serde_json::to_string(&submission.answers)
                .map_err(|e| Error::Storage(format!("Failed to encode answers: {}", e)))?;

            tx.execute(
                "INSERT INTO offline_submissions
                 (id, submission_id, test_id, answers, timestamp, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    submission.id.to_string(),
                    submission.submission_id,
                    submission.test_id,
                    answers,
                    submission.timestamp.timestamp_millis(),
                    submission.synced as i32,
                ],
            )
            .map_err(storage_err)?;

            tx.commit().map_err(storage_err)?;
            debug!(id = %submission.id, attempt = submission.submission_id, "Stored offline submission");
            Ok(())
        })
        .await
    }

    /// Get a submission record by id.
    pub async fn get_submission(&self, id: RecordId) -> Result<Option<OfflineSubmission>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, submission_id, test_id, answers, timestamp, synced
                 FROM offline_submissions WHERE id = ?1",
                params![id.to_string()],
                read_submission_row,
            )
            .optional()
            .map_err(storage_err)?
            .transpose()
        })
        .await
    }

    /// Get the submission record for an exam attempt, if any.
    pub async fn submission_for_attempt(
        &self,
        submission_id: i64,
    ) -> Result<Option<OfflineSubmission>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, submission_id, test_id, answers, timestamp, synced
                 FROM offline_submissions WHERE submission_id = ?1",
                params![submission_id],
                read_submission_row,
            )
            .optional()
            .map_err(storage_err)?
            .transpose()
        })
        .await
    }

    /// All submissions awaiting upload, in index order.
    pub async fn unsynced_submissions(&self) -> Result<Vec<OfflineSubmission>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, submission_id, test_id, answers, timestamp, synced
                     FROM offline_submissions WHERE synced = 0",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([], read_submission_row)
                .map_err(storage_err)?;

            let mut submissions = Vec::new();
            for row in rows {
                submissions.push(row.map_err(storage_err)??);
            }
            Ok(submissions)
        })
        .await
    }

    /// Count submissions still awaiting upload.
    pub async fn count_unsynced_submissions(&self) -> Result<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM offline_submissions WHERE synced = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
        .await
    }

    /// Flip a submission to synced. The flag never reverts.
    pub async fn mark_submission_synced(&self, id: RecordId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE offline_submissions SET synced = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(storage_err)?;
            debug!(id = %id, "Marked submission synced");
            Ok(())
        })
        .await
    }

    // ---- metadata ----

    /// Get a metadata value.
    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)
        })
        .await
    }

    /// Set a metadata value. Last writer wins.
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    /// Delete a metadata entry.
    pub async fn delete_metadata(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM metadata WHERE key = ?1", params![key])
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    /// All metadata entries whose key starts with `prefix`.
    pub async fn metadata_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let pattern = format!("{}%", prefix);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT key, value FROM metadata WHERE key LIKE ?1")
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(storage_err)?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(storage_err)?);
            }
            Ok(entries)
        })
        .await
    }

    // ---- failure queue ----

    /// Insert or update a failure-queue entry.
    pub async fn upsert_failed_item(&self, item: &FailedSyncItem) -> Result<()> {
        let key = failed_item_key(item.id);
        let value = serde_json::to_string(item)
            .map_err(|e| Error::Storage(format!("Failed to encode failure entry: {}", e)))?;
        self.set_metadata(&key, &value).await
    }

    /// Get a failure-queue entry by record id.
    pub async fn get_failed_item(&self, id: RecordId) -> Result<Option<FailedSyncItem>> {
        match self.get_metadata(&failed_item_key(id)).await? {
            Some(value) => Ok(Some(decode_failed_item(&value)?)),
            None => Ok(None),
        }
    }

    /// All failure-queue entries.
    pub async fn all_failed_items(&self) -> Result<Vec<FailedSyncItem>> {
        let entries = self.metadata_with_prefix(FAILED_ITEM_PREFIX).await?;
        entries
            .iter()
            .map(|(_, value)| decode_failed_item(value))
            .collect()
    }

    /// Remove a failure-queue entry.
    pub async fn remove_failed_item(&self, id: RecordId) -> Result<()> {
        self.delete_metadata(&failed_item_key(id)).await
    }

    /// Drop every failure-queue entry.
    pub async fn clear_failed_items(&self) -> Result<()> {
        let pattern = format!("{}%", FAILED_ITEM_PREFIX);
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM metadata WHERE key LIKE ?1", params![pattern])
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    // ---- maintenance ----

    /// Delete every record in a collection.
    pub async fn clear(&self, collection: Collection) -> Result<()> {
        let table = collection.table();
        self.with_conn(move |conn| {
            conn.execute(&format!("DELETE FROM {}", table), [])
                .map_err(storage_err)?;
            Ok(())
        })
        .await?;
        info!(collection = table, "Cleared collection");
        Ok(())
    }

    /// Counts of stored logs by type plus pending submissions.
    pub async fn stats(&self) -> Result<StorageStats> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT log_type, COUNT(*) FROM proctoring_logs GROUP BY log_type")
                .map_err(storage_err)?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(storage_err)?;

            let mut logs_by_type = BTreeMap::new();
            let mut total_logs = 0u64;
            for row in rows {
                let (type_str, count) = row.map_err(storage_err)?;
                let log_type = LogType::parse(&type_str)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                logs_by_type.insert(log_type, count as u64);
                total_logs += count as u64;
            }

            let pending_submissions: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM offline_submissions WHERE synced = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;

            Ok(StorageStats {
                logs_by_type,
                total_logs,
                pending_submissions: pending_submissions as u64,
            })
        })
        .await
    }
}

#[async_trait]
impl KeyStore for Store {
    async fn load_key_material(&self) -> Result<Option<String>> {
        self.get_metadata(DEVICE_KEY_METADATA_KEY).await
    }

    async fn store_key_material(&self, material: &str) -> Result<()> {
        self.set_metadata(DEVICE_KEY_METADATA_KEY, material).await
    }
}

// ---- row mapping ----

type LogColumns = (
    String,
    i64,
    String,
    i64,
    i32,
    Option<String>,
    Option<Vec<u8>>,
    Option<i64>,
);

fn read_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ProctoringLog>> {
    let columns: LogColumns = (
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    );
    Ok(decode_log(columns))
}

fn decode_log(columns: LogColumns) -> Result<ProctoringLog> {
    let (id, submission_id, type_str, timestamp, encrypted, payload, media, taken_at) = columns;

    let log_type = LogType::parse(&type_str).map_err(|e| Error::Storage(e.to_string()))?;
    Ok(ProctoringLog {
        id: RecordId::parse(&id).map_err(|e| Error::Storage(e.to_string()))?,
        submission_id,
        log_type,
        timestamp: millis_to_datetime(timestamp)?,
        encrypted: encrypted != 0,
        payload: decode_payload(log_type, payload, media, taken_at)?,
    })
}

fn read_checkpoint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<SyncCheckpoint>> {
    let columns: (String, String, String, u32, Option<i64>, Option<String>) = (
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    );
    Ok(decode_checkpoint(columns))
}

fn decode_checkpoint(
    columns: (String, String, String, u32, Option<i64>, Option<String>),
) -> Result<SyncCheckpoint> {
    let (log_id, type_str, status, attempt_count, last_attempt, last_error) = columns;
    Ok(SyncCheckpoint {
        log_id: RecordId::parse(&log_id).map_err(|e| Error::Storage(e.to_string()))?,
        log_type: LogType::parse(&type_str).map_err(|e| Error::Storage(e.to_string()))?,
        status: CheckpointStatus::parse(&status)?,
        attempt_count,
        last_attempt: last_attempt.map(millis_to_datetime).transpose()?,
        last_error,
    })
}

fn read_submission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<OfflineSubmission>> {
    let columns: (String, i64, i64, String, i64, i32) = (
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    );
    Ok(decode_submission(columns))
}

fn decode_submission(columns: (String, i64, i64, String, i64, i32)) -> Result<OfflineSubmission> {
    let (id, submission_id, test_id, answers, timestamp, synced) = columns;
    let answers: Vec<Answer> = serde_json::from_str(&answers)
        .map_err(|e| Error::Storage(format!("Failed to decode answers: {}", e)))?;
    Ok(OfflineSubmission {
        id: RecordId::parse(&id).map_err(|e| Error::Storage(e.to_string()))?,
        submission_id,
        test_id,
        answers,
        timestamp: millis_to_datetime(timestamp)?,
        synced: synced != 0,
    })
}

fn encode_payload(
    payload: &LogPayload,
) -> Result<(Option<String>, Option<Vec<u8>>, Option<i64>)> {
    match payload {
        LogPayload::Media(capture) => Ok((
            None,
            Some(capture.data.clone()),
            Some(capture.taken_at.timestamp_millis()),
        )),
        LogPayload::FocusChange(event) => Ok((Some(encode_event(event)?), None, None)),
        LogPayload::MouseClick(event) => Ok((Some(encode_event(event)?), None, None)),
        LogPayload::Keystroke(event) => Ok((Some(encode_event(event)?), None, None)),
    }
}

fn encode_event<T: serde::Serialize>(event: &T) -> Result<String> {
    serde_json::to_string(event)
        .map_err(|e| Error::Storage(format!("Failed to encode event payload: {}", e)))
}

fn decode_payload(
    log_type: LogType,
    payload: Option<String>,
    media: Option<Vec<u8>>,
    taken_at: Option<i64>,
) -> Result<LogPayload> {
    match log_type {
        LogType::WebcamPhoto | LogType::Screenshot => {
            let data =
                media.ok_or_else(|| Error::Storage("Missing media payload".to_string()))?;
            let taken_at = taken_at
                .ok_or_else(|| Error::Storage("Missing media capture time".to_string()))?;
            Ok(LogPayload::Media(MediaCapture {
                data,
                taken_at: millis_to_datetime(taken_at)?,
            }))
        }
        LogType::FocusChange => Ok(LogPayload::FocusChange(decode_event(payload)?)),
        LogType::MouseClick => Ok(LogPayload::MouseClick(decode_event(payload)?)),
        LogType::Keystroke => Ok(LogPayload::Keystroke(decode_event(payload)?)),
    }
}

fn decode_event<T: serde::de::DeserializeOwned>(payload: Option<String>) -> Result<T> {
    let payload =
        payload.ok_or_else(|| Error::Storage("Missing event payload".to_string()))?;
    serde_json::from_str(&payload)
        .map_err(|e| Error::Storage(format!("Failed to decode event payload: {}", e)))
}

fn failed_item_key(id: RecordId) -> String {
    format!("{}{}", FAILED_ITEM_PREFIX, id)
}

fn decode_failed_item(value: &str) -> Result<FailedSyncItem> {
    serde_json::from_str(value)
        .map_err(|e| Error::Storage(format!("Failed to decode failure entry: {}", e)))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Storage(format!("Invalid stored timestamp: {}", millis)))
}

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn join_err(err: tokio::task::JoinError) -> Error {
    Error::Storage(format!("Blocking task failed: {}", err))
}

//! Record types persisted by the local store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invigil_common::{LogType, RecordId, RecordKind};

/// One captured evidence unit.
///
/// Immutable once stored; deleted together with its checkpoint when
/// successfully synced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctoringLog {
    /// Client-generated unique identifier.
    pub id: RecordId,
    /// Owning exam attempt (server-assigned).
    pub submission_id: i64,
    pub log_type: LogType,
    /// Creation time of the record.
    pub timestamp: DateTime<Utc>,
    /// True when the payload bytes are ciphertext. Set only for
    /// binary-media types, and only while encryption is configured on.
    pub encrypted: bool,
    pub payload: LogPayload,
}

impl ProctoringLog {
    fn new(submission_id: i64, log_type: LogType, encrypted: bool, payload: LogPayload) -> Self {
        Self {
            id: RecordId::generate(),
            submission_id,
            log_type,
            timestamp: Utc::now(),
            encrypted,
            payload,
        }
    }

    /// Create a webcam capture record. `data` is the stored (possibly
    /// encrypted) media payload.
    pub fn webcam_photo(
        submission_id: i64,
        data: Vec<u8>,
        encrypted: bool,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            submission_id,
            LogType::WebcamPhoto,
            encrypted,
            LogPayload::Media(MediaCapture { data, taken_at }),
        )
    }

    /// Create a screenshot record.
    pub fn screenshot(
        submission_id: i64,
        data: Vec<u8>,
        encrypted: bool,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            submission_id,
            LogType::Screenshot,
            encrypted,
            LogPayload::Media(MediaCapture { data, taken_at }),
        )
    }

    /// Create a focus-change event record.
    pub fn focus_change(submission_id: i64, event: FocusChange) -> Self {
        Self::new(
            submission_id,
            LogType::FocusChange,
            false,
            LogPayload::FocusChange(event),
        )
    }

    /// Create a mouse-click event record.
    pub fn mouse_click(submission_id: i64, event: MouseClick) -> Self {
        Self::new(
            submission_id,
            LogType::MouseClick,
            false,
            LogPayload::MouseClick(event),
        )
    }

    /// Create a keystroke event record.
    pub fn keystroke(submission_id: i64, event: Keystroke) -> Self {
        Self::new(
            submission_id,
            LogType::Keystroke,
            false,
            LogPayload::Keystroke(event),
        )
    }
}

/// Type-specific payload of a proctoring log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogPayload {
    Media(MediaCapture),
    FocusChange(FocusChange),
    MouseClick(MouseClick),
    Keystroke(Keystroke),
}

/// Binary media payload plus its capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCapture {
    pub data: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

/// Window/tab focus transition observed during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusChange {
    /// Whether the exam window gained (true) or lost (false) focus.
    pub focused: bool,
    /// Best-effort description of where focus went.
    pub target: String,
    pub at: DateTime<Utc>,
}

/// Pointer click observed during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseClick {
    pub x: i32,
    pub y: i32,
    pub at: DateTime<Utc>,
}

/// Keystroke observed during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keystroke {
    pub key: String,
    pub at: DateTime<Utc>,
}

/// One answered question within a submission, order-preserving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: i64,
    pub answer: String,
}

/// A finished exam attempt awaiting upload.
///
/// Exactly one is created locally per attempt; `synced` flips
/// false -> true exactly once and never reverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSubmission {
    /// Client-generated unique identifier.
    pub id: RecordId,
    /// Server-assigned attempt id.
    pub submission_id: i64,
    pub test_id: i64,
    pub answers: Vec<Answer>,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}

impl OfflineSubmission {
    /// Create a pending submission record.
    pub fn new(submission_id: i64, test_id: i64, answers: Vec<Answer>) -> Self {
        Self {
            id: RecordId::generate(),
            submission_id,
            test_id,
            answers,
            timestamp: Utc::now(),
            synced: false,
        }
    }
}

/// Sync status of a single proctoring log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Awaiting its first sync attempt.
    Pending,
    /// A sync pass is currently uploading the record.
    Syncing,
    /// In-attempt retries were exhausted; handed to the retry queue.
    Failed,
}

impl CheckpointStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> invigil_common::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            other => Err(invigil_common::Error::Storage(format!(
                "Unknown checkpoint status: {}",
                other
            ))),
        }
    }
}

/// Sync-state shadow of a proctoring log, keyed by the log id.
///
/// Created atomically with its log; deleted together with it on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub log_id: RecordId,
    pub log_type: LogType,
    pub status: CheckpointStatus,
    pub attempt_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncCheckpoint {
    /// Fresh pending checkpoint for a newly stored log.
    pub fn pending(log: &ProctoringLog) -> Self {
        Self {
            log_id: log.id,
            log_type: log.log_type,
            status: CheckpointStatus::Pending,
            attempt_count: 0,
            last_attempt: None,
            last_error: None,
        }
    }

    /// Mark as picked up by a sync pass.
    pub fn mark_syncing(&mut self) {
        self.status = CheckpointStatus::Syncing;
        self.last_attempt = Some(Utc::now());
    }

    /// Mark as failed after in-attempt retries were exhausted.
    pub fn mark_failed(&mut self, attempts: u32, error: impl Into<String>) {
        self.status = CheckpointStatus::Failed;
        self.attempt_count += attempts;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

/// Durable retry-queue entry, keyed by the originating record id.
///
/// `is_retryable` is computed once at insertion from the failure and
/// never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSyncItem {
    pub id: RecordId,
    pub kind: RecordKind,
    pub log_type: Option<LogType>,
    pub failure_reason: String,
    pub attempt_count: u32,
    pub first_failure_time: DateTime<Utc>,
    pub last_attempt_time: DateTime<Utc>,
    pub next_retry_time: DateTime<Utc>,
    pub is_retryable: bool,
}

/// Counts of locally stored records, by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub logs_by_type: BTreeMap<LogType, u64>,
    pub total_logs: u64,
    pub pending_submissions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_constructors_set_type_and_payload() {
        let log = ProctoringLog::webcam_photo(7, vec![1, 2, 3], true, Utc::now());
        assert_eq!(log.log_type, LogType::WebcamPhoto);
        assert!(log.encrypted);
        assert!(matches!(log.payload, LogPayload::Media(_)));

        let log = ProctoringLog::screenshot(7, vec![9], false, Utc::now());
        assert_eq!(log.log_type, LogType::Screenshot);
        assert!(!log.encrypted);
    }

    #[test]
    fn test_event_constructors_are_never_encrypted() {
        let log = ProctoringLog::focus_change(
            7,
            FocusChange {
                focused: false,
                target: "browser tab".to_string(),
                at: Utc::now(),
            },
        );
        assert_eq!(log.log_type, LogType::FocusChange);
        assert!(!log.encrypted);
    }

    #[test]
    fn test_checkpoint_lifecycle() {
        let log = ProctoringLog::keystroke(
            1,
            Keystroke {
                key: "Tab".to_string(),
                at: Utc::now(),
            },
        );
        let mut checkpoint = SyncCheckpoint::pending(&log);

        assert_eq!(checkpoint.status, CheckpointStatus::Pending);
        assert_eq!(checkpoint.attempt_count, 0);
        assert!(checkpoint.last_attempt.is_none());

        checkpoint.mark_syncing();
        assert_eq!(checkpoint.status, CheckpointStatus::Syncing);
        assert!(checkpoint.last_attempt.is_some());

        checkpoint.mark_failed(5, "connection refused");
        assert_eq!(checkpoint.status, CheckpointStatus::Failed);
        assert_eq!(checkpoint.attempt_count, 5);
        assert_eq!(checkpoint.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_new_submission_is_unsynced() {
        let submission = OfflineSubmission::new(
            42,
            3,
            vec![Answer {
                question_id: 1,
                answer: "B".to_string(),
            }],
        );
        assert!(!submission.synced);
        assert_eq!(submission.submission_id, 42);
    }

    #[test]
    fn test_checkpoint_status_roundtrip() {
        for status in [
            CheckpointStatus::Pending,
            CheckpointStatus::Syncing,
            CheckpointStatus::Failed,
        ] {
            assert_eq!(CheckpointStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(CheckpointStatus::parse("done").is_err());
    }
}

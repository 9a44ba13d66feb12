//! Backend boundary trait and wire types.
//!
//! The offline layer consumes four backend capabilities: a reachability
//! probe, batched log ingestion, submission upload, and object-storage
//! upload for binary media. Implementations must handle their own
//! authentication.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invigil_common::{LogType, RecordId, Result};

/// Stable reference to an uploaded media object, usable by the
/// ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub object_key: String,
}

/// One typed log entry in an ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogUpload {
    pub log_id: RecordId,
    pub submission_id: i64,
    pub log_type: LogType,
    pub timestamp: DateTime<Utc>,
    /// Structured event payload for non-media types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
    /// Reference to the uploaded media object for media types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    /// Capture time for media types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

/// One answered question, order-preserving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerUpload {
    pub question_id: i64,
    pub answer: String,
}

/// A finished exam attempt's answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionUpload {
    pub submission_id: i64,
    pub test_id: i64,
    pub answers: Vec<AnswerUpload>,
    pub submitted_at: DateTime<Utc>,
}

/// Decrypted binary media handed to object storage.
///
/// The bytes live only in memory for the duration of the upload call.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub log_id: RecordId,
    pub submission_id: i64,
    pub log_type: LogType,
    pub content_type: String,
    pub data: Bytes,
}

/// Backend boundary consumed by the offline layer.
///
/// Implementations classify upload failures:
/// authorization/permission/not-found responses map to
/// [`Error::PermanentSync`](invigil_common::Error::PermanentSync),
/// transport-shaped failures to
/// [`Error::TransientSync`](invigil_common::Error::TransientSync).
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Lightweight reachability probe. `Ok` means reachable.
    ///
    /// Never used for data transfer.
    async fn health_check(&self) -> Result<()>;

    /// Ingest a batch of typed log metadata.
    async fn ingest_logs(&self, batch: &[LogUpload]) -> Result<()>;

    /// Upload a finished attempt.
    async fn submit_attempt(&self, upload: &SubmissionUpload) -> Result<()>;

    /// Upload binary media, returning a stable reference for ingestion.
    async fn upload_media(&self, upload: MediaUpload) -> Result<MediaRef>;
}

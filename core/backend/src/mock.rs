//! In-memory backend for testing.
//!
//! All data is kept in memory and lost on drop. Failures are scripted
//! per operation: queued failures are consumed one per call, after which
//! a standing failure (if any) applies to every call.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use invigil_common::{Error, Result};

use crate::api::{BackendClient, LogUpload, MediaRef, MediaUpload, SubmissionUpload};

#[derive(Default)]
struct Op {
    calls: usize,
    queued_failures: VecDeque<Error>,
    standing_failure: Option<(bool, String)>,
}

impl Op {
    fn next_failure(&mut self) -> Option<Error> {
        self.calls += 1;
        if let Some(err) = self.queued_failures.pop_front() {
            return Some(err);
        }
        self.standing_failure.as_ref().map(|(permanent, message)| {
            if *permanent {
                Error::PermanentSync(message.clone())
            } else {
                Error::TransientSync(message.clone())
            }
        })
    }
}

#[derive(Default)]
struct State {
    unreachable: bool,
    health_checks: usize,
    ingest: Op,
    submit: Op,
    media: Op,
    ingested: Vec<LogUpload>,
    submitted: Vec<SubmissionUpload>,
    uploaded_media: Vec<MediaUpload>,
}

/// Scriptable in-memory backend.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    /// Create a reachable mock with no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent health probes succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    /// Queue a one-shot failure for the next log ingestion call.
    pub fn queue_ingest_failure(&self, err: Error) {
        self.state.lock().unwrap().ingest.queued_failures.push_back(err);
    }

    /// Fail every log ingestion call until cleared.
    pub fn fail_ingest_with(&self, permanent: bool, message: &str) {
        self.state.lock().unwrap().ingest.standing_failure =
            Some((permanent, message.to_string()));
    }

    /// Queue a one-shot failure for the next submission call.
    pub fn queue_submit_failure(&self, err: Error) {
        self.state.lock().unwrap().submit.queued_failures.push_back(err);
    }

    /// Fail every submission call until cleared.
    pub fn fail_submit_with(&self, permanent: bool, message: &str) {
        self.state.lock().unwrap().submit.standing_failure =
            Some((permanent, message.to_string()));
    }

    /// Queue a one-shot failure for the next media upload.
    pub fn queue_media_failure(&self, err: Error) {
        self.state.lock().unwrap().media.queued_failures.push_back(err);
    }

    /// Fail every media upload until cleared.
    pub fn fail_media_with(&self, permanent: bool, message: &str) {
        self.state.lock().unwrap().media.standing_failure =
            Some((permanent, message.to_string()));
    }

    /// Clear all scripted failures.
    pub fn clear_failures(&self) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        for op in [&mut state.ingest, &mut state.submit, &mut state.media] {
            op.queued_failures.clear();
            op.standing_failure = None;
        }
    }

    /// Number of health probes received.
    pub fn health_checks(&self) -> usize {
        self.state.lock().unwrap().health_checks
    }

    /// Number of ingestion calls received (including failed ones).
    pub fn ingest_calls(&self) -> usize {
        self.state.lock().unwrap().ingest.calls
    }

    /// Number of submission calls received (including failed ones).
    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit.calls
    }

    /// Number of media uploads received (including failed ones).
    pub fn media_calls(&self) -> usize {
        self.state.lock().unwrap().media.calls
    }

    /// Log entries accepted so far.
    pub fn ingested_logs(&self) -> Vec<LogUpload> {
        self.state.lock().unwrap().ingested.clone()
    }

    /// Submissions accepted so far.
    pub fn submitted_attempts(&self) -> Vec<SubmissionUpload> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Media uploads accepted so far.
    pub fn uploaded_media(&self) -> Vec<MediaUpload> {
        self.state.lock().unwrap().uploaded_media.clone()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn health_check(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.health_checks += 1;
        if state.unreachable {
            Err(Error::TransientSync("Mock backend unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn ingest_logs(&self, batch: &[LogUpload]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.ingest.next_failure() {
            return Err(err);
        }
        state.ingested.extend_from_slice(batch);
        Ok(())
    }

    async fn submit_attempt(&self, upload: &SubmissionUpload) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.submit.next_failure() {
            return Err(err);
        }
        state.submitted.push(upload.clone());
        Ok(())
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<MediaRef> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.media.next_failure() {
            return Err(err);
        }
        let object_key = format!("mock/{}/{}", upload.submission_id, upload.log_id);
        state.uploaded_media.push(upload);
        Ok(MediaRef { object_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use invigil_common::{LogType, RecordId};

    fn event_upload() -> LogUpload {
        LogUpload {
            log_id: RecordId::generate(),
            submission_id: 1,
            log_type: LogType::MouseClick,
            timestamp: Utc::now(),
            event: Some(serde_json::json!({"x": 3, "y": 4})),
            media: None,
            taken_at: None,
        }
    }

    #[tokio::test]
    async fn test_records_accepted_uploads() {
        let backend = MockBackend::new();

        backend.ingest_logs(&[event_upload()]).await.unwrap();
        assert_eq!(backend.ingested_logs().len(), 1);
        assert_eq!(backend.ingest_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_failure_consumed_once() {
        let backend = MockBackend::new();
        backend.queue_ingest_failure(Error::TransientSync("flaky".to_string()));

        assert!(backend.ingest_logs(&[event_upload()]).await.is_err());
        assert!(backend.ingest_logs(&[event_upload()]).await.is_ok());
        assert_eq!(backend.ingest_calls(), 2);
        assert_eq!(backend.ingested_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_standing_failure_applies_until_cleared() {
        let backend = MockBackend::new();
        backend.fail_submit_with(true, "Unauthorized");

        let upload = SubmissionUpload {
            submission_id: 1,
            test_id: 2,
            answers: vec![],
            submitted_at: Utc::now(),
        };
        assert!(backend.submit_attempt(&upload).await.unwrap_err().is_permanent());
        assert!(backend.submit_attempt(&upload).await.is_err());

        backend.clear_failures();
        assert!(backend.submit_attempt(&upload).await.is_ok());
    }

    #[tokio::test]
    async fn test_media_upload_returns_reference() {
        let backend = MockBackend::new();
        let log_id = RecordId::generate();

        let media_ref = backend
            .upload_media(MediaUpload {
                log_id,
                submission_id: 5,
                log_type: LogType::Screenshot,
                content_type: "image/png".to_string(),
                data: Bytes::from_static(b"png"),
            })
            .await
            .unwrap();

        assert_eq!(media_ref.object_key, format!("mock/5/{}", log_id));
        assert_eq!(backend.uploaded_media().len(), 1);
    }

    #[tokio::test]
    async fn test_health_probe_follows_reachability() {
        let backend = MockBackend::new();
        assert!(backend.health_check().await.is_ok());

        backend.set_reachable(false);
        assert!(backend.health_check().await.is_err());

        backend.set_reachable(true);
        assert!(backend.health_check().await.is_ok());
        assert_eq!(backend.health_checks(), 3);
    }
}

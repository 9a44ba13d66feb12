//! HTTP implementation of the backend boundary.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use invigil_common::{Error, Result};

use crate::api::{BackendClient, LogUpload, MediaRef, MediaUpload, SubmissionUpload};

/// Default timeout for the reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend client over HTTP.
///
/// Only the health probe carries an explicit timeout; record uploads rely
/// on the underlying transport's own timeout behavior.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
    probe_timeout: Duration,
}

impl HttpBackend {
    /// Create a client against `base_url` (e.g. `https://exam.example.com/api/`).
    ///
    /// # Errors
    /// - Returns error if the base URL is invalid
    pub fn new(base_url: impl AsRef<str>, auth_token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| Error::InvalidInput(format!("Invalid backend URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
            probe_timeout: PROBE_TIMEOUT,
        })
    }

    /// Override the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint path {}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl BackendClient for HttpBackend {
    async fn health_check(&self) -> Result<()> {
        let url = self.endpoint("health")?;

        let response = self
            .authorize(self.client.get(url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Error::TransientSync(format!("Health probe failed: {}", e)))?;

        let status = response.status();
        if reachable_status(status) {
            debug!(status = status.as_u16(), "Health probe succeeded");
            Ok(())
        } else {
            Err(Error::TransientSync(format!(
                "Health probe returned HTTP {}",
                status.as_u16()
            )))
        }
    }

    async fn ingest_logs(&self, batch: &[LogUpload]) -> Result<()> {
        let url = self.endpoint("proctoring/logs")?;
        let body = serde_json::json!({ "logs": batch });

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientSync(format!("Log ingestion request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(count = batch.len(), "Ingested log batch");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Log ingestion rejected");
        Err(classify_response(status, &body))
    }

    async fn submit_attempt(&self, upload: &SubmissionUpload) -> Result<()> {
        let url = self.endpoint("submissions")?;

        let response = self
            .authorize(self.client.post(url))
            .json(upload)
            .send()
            .await
            .map_err(|e| Error::TransientSync(format!("Submission request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(attempt = upload.submission_id, "Uploaded submission");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            attempt = upload.submission_id,
            "Submission rejected"
        );
        Err(classify_response(status, &body))
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<MediaRef> {
        let key = media_object_key(&upload);
        let encoded: String = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let url = self.endpoint(&format!("media/{}", encoded))?;

        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, upload.content_type.clone())
            .body(upload.data.clone())
            .send()
            .await
            .map_err(|e| Error::TransientSync(format!("Media upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), log_id = %upload.log_id, "Media upload rejected");
            return Err(classify_response(status, &body));
        }

        let payload = response
            .json::<MediaUploadResponse>()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid media upload response: {}", e)))?;

        debug!(log_id = %upload.log_id, key = %payload.object_key, "Uploaded media object");
        Ok(MediaRef {
            object_key: payload.object_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    object_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Whether a probe response status counts as reachable.
///
/// 404 counts: the endpoint existing at all is evidence of reachability
/// even if unimplemented.
fn reachable_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

/// Map a non-success upload response onto the sync error taxonomy.
fn classify_response(status: StatusCode, body: &str) -> Error {
    let message = api_error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Error::PermanentSync(message)
        }
        _ => Error::TransientSync(message),
    }
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), trimmed)
    }
}

fn media_object_key(upload: &MediaUpload) -> String {
    format!(
        "proctoring/{}/{}/{}",
        upload.submission_id, upload.log_type, upload.log_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use invigil_common::{LogType, RecordId};

    #[test]
    fn test_reachable_status_classification() {
        assert!(reachable_status(StatusCode::OK));
        assert!(reachable_status(StatusCode::NO_CONTENT));
        assert!(reachable_status(StatusCode::NOT_FOUND));

        assert!(!reachable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!reachable_status(StatusCode::BAD_GATEWAY));
        assert!(!reachable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_auth_statuses_classify_permanent() {
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert!(classify_response(status, "").is_permanent());
        }
    }

    #[test]
    fn test_server_errors_classify_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            let err = classify_response(status, "");
            assert!(!err.is_permanent());
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_api_error_message_prefers_structured_body() {
        let message =
            api_error_message(StatusCode::FORBIDDEN, r#"{"message": "Token expired"}"#);
        assert_eq!(message, "Token expired (403)");

        let message = api_error_message(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(message, "HTTP 502: upstream down");

        let message = api_error_message(StatusCode::BAD_GATEWAY, "");
        assert_eq!(message, "HTTP 502");
    }

    #[test]
    fn test_media_object_key_layout() {
        let upload = MediaUpload {
            log_id: RecordId::generate(),
            submission_id: 17,
            log_type: LogType::WebcamPhoto,
            content_type: "image/jpeg".to_string(),
            data: Bytes::from_static(b"jpeg"),
        };

        let key = media_object_key(&upload);
        assert!(key.starts_with("proctoring/17/webcam_photo/"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpBackend::new("not a url", None).is_err());
    }
}

//! Common identifier types used throughout Invigil.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated identifier for one locally stored record.
///
/// Both proctoring logs and offline submissions are keyed by a `RecordId`.
/// Sync checkpoints and failure-queue entries reference their record
/// through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    ///
    /// # Errors
    /// - Returns error if the string is not a valid UUID
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid record id: {}", e)))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of proctoring evidence a log record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    WebcamPhoto,
    Screenshot,
    FocusChange,
    MouseClick,
    Keystroke,
}

impl LogType {
    /// True for types whose payload is binary media.
    ///
    /// Media payloads are the only ones encrypted at rest.
    pub fn is_media(&self) -> bool {
        matches!(self, Self::WebcamPhoto | Self::Screenshot)
    }

    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebcamPhoto => "webcam_photo",
            Self::Screenshot => "screenshot",
            Self::FocusChange => "focus_change",
            Self::MouseClick => "mouse_click",
            Self::Keystroke => "keystroke",
        }
    }

    /// Parse the stable string form back into a log type.
    ///
    /// # Errors
    /// - Returns error for an unknown type string
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "webcam_photo" => Ok(Self::WebcamPhoto),
            "screenshot" => Ok(Self::Screenshot),
            "focus_change" => Ok(Self::FocusChange),
            "mouse_click" => Ok(Self::MouseClick),
            "keystroke" => Ok(Self::Keystroke),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown log type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collection a failure-queue entry points back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Log,
    Submission,
}

impl RecordKind {
    /// Stable string form used in persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Submission => "submission",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_roundtrip() {
        let id = RecordId::generate();
        let parsed = RecordId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_id_rejects_garbage() {
        assert!(RecordId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_log_type_media_split() {
        assert!(LogType::WebcamPhoto.is_media());
        assert!(LogType::Screenshot.is_media());
        assert!(!LogType::FocusChange.is_media());
        assert!(!LogType::MouseClick.is_media());
        assert!(!LogType::Keystroke.is_media());
    }

    #[test]
    fn test_log_type_string_roundtrip() {
        for ty in [
            LogType::WebcamPhoto,
            LogType::Screenshot,
            LogType::FocusChange,
            LogType::MouseClick,
            LogType::Keystroke,
        ] {
            assert_eq!(LogType::parse(ty.as_str()).unwrap(), ty);
        }
        assert!(LogType::parse("telemetry").is_err());
    }
}

//! Common error types for Invigil.

use thiserror::Error;

/// Top-level error type for Invigil operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local storage transaction failed.
    ///
    /// Not retried by this layer: storage failures are typically
    /// environmental (quota, corruption) and surface to the caller.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Key provisioning or encrypt/decrypt failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Network or backend failure during an upload; retried with backoff.
    #[error("Transient sync error: {0}")]
    TransientSync(String),

    /// Authorization/permission/not-found class failure; never auto-retried.
    #[error("Permanent sync error: {0}")]
    PermanentSync(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether an in-flight sync attempt should retry after this error.
    ///
    /// Only transport-level failures qualify; everything else aborts the
    /// attempt and is handled one level up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientSync(_) | Error::Io(_))
    }

    /// Whether this error classifies a record as permanently unsyncable.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::PermanentSync(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

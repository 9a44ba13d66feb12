//! Local persistent store for Invigil.
//!
//! A versioned SQLite database with the four offline collections
//! (proctoring logs, offline submissions, sync checkpoints, metadata),
//! secondary indexes for status/type lookup, and atomic multi-collection
//! transactions for log+checkpoint writes.
//!
//! # Design Principles
//! - Async interface: all SQL runs on the blocking pool
//! - Idempotent migrations: reopening an existing database is harmless
//! - Unified error semantics: every failure is a `StorageError`, never
//!   retried at this layer

pub mod records;
pub mod schema;
pub mod store;

pub use records::{
    Answer, CheckpointStatus, FailedSyncItem, FocusChange, Keystroke, LogPayload, MediaCapture,
    MouseClick, OfflineSubmission, ProctoringLog, StorageStats, SyncCheckpoint,
};
pub use store::{Collection, Store, FAILED_ITEM_PREFIX};

//! Backend boundary for Invigil.
//!
//! This module provides a trait-based interface to the exam backend
//! (health probe, batched log ingestion, submission upload, media object
//! storage), an HTTP implementation, and an in-memory mock for tests.
//!
//! # Design Principles
//! - Backend isolation: no transport-specific logic leaks into the sync
//!   or store modules
//! - Structured failure classification: implementations map responses
//!   onto the transient/permanent sync error taxonomy

pub mod api;
pub mod http;
pub mod mock;

pub use api::{
    AnswerUpload, BackendClient, LogUpload, MediaRef, MediaUpload, SubmissionUpload,
};
pub use http::{HttpBackend, PROBE_TIMEOUT};
pub use mock::MockBackend;

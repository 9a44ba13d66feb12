//! Invigil offline layer facade.
//!
//! The entry point UI and capture code talk to: save evidence and
//! submissions while the backend is unreachable, observe connectivity
//! and sync progress, and let the background machinery reconcile with
//! the server once it is reachable again.

pub mod config;
pub mod manager;

pub use config::OfflineConfig;
pub use manager::{OfflineManager, DB_FILENAME};

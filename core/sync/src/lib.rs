//! Invigil sync layer.
//!
//! This module provides:
//! - Network reachability monitoring with change-only notifications
//! - A sync engine draining pending evidence and submissions to the
//!   backend, one pass at a time
//! - A durable failure-recovery queue with exponential backoff
//! - Shared retry policy for both in-attempt and queued retries

pub mod backoff;
pub mod engine;
pub mod monitor;
pub mod recovery;

// Re-export main types
pub use backoff::{RetryConfig, RetryExecutor};
pub use engine::{SyncConfig, SyncEngine, SyncOutcome, SyncProgress, SyncStats};
pub use monitor::{MonitorConfig, NetworkMonitor, NetworkStatus};
pub use recovery::{
    is_permanent_reason, FailureQueue, FailureRecoveryManager, FailureReport, RecoveryConfig,
};

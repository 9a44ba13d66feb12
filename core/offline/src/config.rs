//! Configuration for the offline layer.

use serde::{Deserialize, Serialize};

use invigil_sync::{MonitorConfig, RecoveryConfig, SyncConfig};

/// Top-level configuration with fixed defaults, overridable
/// field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Encrypt binary media evidence at rest.
    pub encryption_enabled: bool,
    /// Sync engine settings (per-record retries, batch size).
    pub sync: SyncConfig,
    /// Network monitor settings (health-check interval).
    pub monitor: MonitorConfig,
    /// Failure recovery settings (tick interval, permanent threshold).
    pub recovery: RecoveryConfig,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            sync: SyncConfig::default(),
            monitor: MonitorConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();

        assert!(config.encryption_enabled);
        assert_eq!(config.sync.retry.max_attempts, 5);
        assert_eq!(config.sync.retry.base_delay, Duration::from_millis(2000));
        assert_eq!(config.sync.retry.backoff_multiplier, 2.0);
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.monitor.probe_interval, Duration::from_secs(30));
        assert_eq!(config.recovery.tick_interval, Duration::from_secs(5));
        assert_eq!(
            config.recovery.permanent_failure_threshold,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut config = OfflineConfig::default();
        config.encryption_enabled = false;
        config.sync.batch_size = 25;

        let json = serde_json::to_string(&config).unwrap();
        let restored: OfflineConfig = serde_json::from_str(&json).unwrap();

        assert!(!restored.encryption_enabled);
        assert_eq!(restored.sync.batch_size, 25);
        assert_eq!(restored.monitor.probe_interval, config.monitor.probe_interval);
    }
}

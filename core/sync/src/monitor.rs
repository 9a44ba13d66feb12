//! Network reachability monitoring.
//!
//! Tracks device-level connectivity and backend reachability
//! independently: a device can have network while the specific backend
//! is down, and offline mode is active when either is unavailable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use invigil_backend::BackendClient;

/// Combined device/backend connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Device-level connectivity as last reported by the host shell.
    pub device_online: bool,
    /// Result of the most recent backend health probe.
    pub backend_reachable: bool,
    /// Completion time of the most recent probe; `None` until the first.
    pub last_checked: Option<DateTime<Utc>>,
}

impl NetworkStatus {
    /// Offline mode is active when either side of connectivity is down.
    pub fn is_offline_mode(&self) -> bool {
        !self.device_online || !self.backend_reachable
    }
}

impl Default for NetworkStatus {
    /// Optimistic until the first probe or device signal arrives.
    fn default() -> Self {
        Self {
            device_online: true,
            backend_reachable: true,
            last_checked: None,
        }
    }
}

/// Configuration for the network monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between periodic probes while the device is online.
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Tracks connectivity and fans status changes out to subscribers.
///
/// Subscribers are notified only when one of the connectivity flags
/// flips; `last_checked` refreshes silently on every poll.
pub struct NetworkMonitor<B: BackendClient + ?Sized> {
    backend: Arc<B>,
    status_tx: watch::Sender<NetworkStatus>,
    probe_kick: Notify,
    config: MonitorConfig,
}

impl<B: BackendClient + ?Sized> NetworkMonitor<B> {
    /// Create a monitor over the given backend collaborator.
    pub fn new(backend: Arc<B>, config: MonitorConfig) -> Self {
        let (status_tx, _) = watch::channel(NetworkStatus::default());
        Self {
            backend,
            status_tx,
            probe_kick: Notify::new(),
            config,
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> NetworkStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status changes.
    ///
    /// The receiver's current value is the present status (immediate
    /// delivery); notifications follow only on change.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status_tx.subscribe()
    }

    /// True if either device connectivity or backend reachability is
    /// down.
    pub fn is_offline_mode(&self) -> bool {
        self.status().is_offline_mode()
    }

    /// Feed a device-level connectivity signal from the host shell.
    ///
    /// Going offline publishes immediately, skipping any probe; coming
    /// back online publishes and kicks an immediate re-probe.
    pub fn set_device_online(&self, online: bool) {
        self.status_tx.send_if_modified(|status| {
            let changed = status.device_online != online;
            status.device_online = online;
            changed
        });

        if online {
            debug!("Device reported online; probing backend");
            self.probe_kick.notify_one();
        } else {
            info!("Device reported offline");
        }
    }

    /// Run one health probe and reconcile status.
    ///
    /// Returns whether the backend was reachable.
    pub async fn probe_now(&self) -> bool {
        let reachable = self.backend.health_check().await.is_ok();

        self.status_tx.send_if_modified(|status| {
            let changed = status.backend_reachable != reachable;
            status.backend_reachable = reachable;
            status.last_checked = Some(Utc::now());
            changed
        });

        debug!(reachable, "Health probe completed");
        reachable
    }

    /// Periodic probe loop; spawn from the application root.
    ///
    /// Probes on a fixed interval while the device reports online, and
    /// immediately when a device-online signal arrives.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.config.probe_interval, "Network monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.status().device_online {
                        self.probe_now().await;
                    }
                }
                _ = self.probe_kick.notified() => {
                    self.probe_now().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invigil_backend::MockBackend;

    fn monitor_with(backend: Arc<MockBackend>) -> NetworkMonitor<MockBackend> {
        NetworkMonitor::new(backend, MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_initial_status_is_optimistic() {
        let monitor = monitor_with(Arc::new(MockBackend::new()));
        let status = monitor.status();

        assert!(status.device_online);
        assert!(status.backend_reachable);
        assert!(status.last_checked.is_none());
        assert!(!monitor.is_offline_mode());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_status_immediately() {
        let monitor = monitor_with(Arc::new(MockBackend::new()));
        let rx = monitor.subscribe();

        assert!(!rx.borrow().is_offline_mode());
    }

    #[tokio::test]
    async fn test_probe_failure_flips_reachability_once() {
        let backend = Arc::new(MockBackend::new());
        backend.set_reachable(false);
        let monitor = monitor_with(backend.clone());
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();

        assert!(!monitor.probe_now().await);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_offline_mode());

        // A second failed probe refreshes last_checked without
        // re-notifying subscribers.
        let first_checked = monitor.status().last_checked;
        assert!(!monitor.probe_now().await);
        assert!(!rx.has_changed().unwrap());
        assert_ne!(monitor.status().last_checked, first_checked);
    }

    #[tokio::test]
    async fn test_device_offline_skips_probe() {
        let backend = Arc::new(MockBackend::new());
        let monitor = monitor_with(backend.clone());

        monitor.set_device_online(false);

        assert!(monitor.is_offline_mode());
        assert_eq!(backend.health_checks(), 0);
    }

    #[tokio::test]
    async fn test_offline_online_transition_notifies_once() {
        let backend = Arc::new(MockBackend::new());
        let monitor = monitor_with(backend.clone());
        let mut rx = monitor.subscribe();

        monitor.set_device_online(false);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // Back online with a successful probe: exactly one notification.
        monitor.set_device_online(true);
        monitor.probe_now().await;
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_offline_mode());

        // Further successful probes stay silent.
        monitor.probe_now().await;
        monitor.probe_now().await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_offline_mode_is_dual_condition() {
        let backend = Arc::new(MockBackend::new());
        backend.set_reachable(false);
        let monitor = monitor_with(backend.clone());

        // Device online but backend down
        monitor.probe_now().await;
        assert!(monitor.status().device_online);
        assert!(monitor.is_offline_mode());

        // Backend back up
        backend.set_reachable(true);
        monitor.probe_now().await;
        assert!(!monitor.is_offline_mode());

        // Device down while backend is fine
        monitor.set_device_online(false);
        assert!(monitor.is_offline_mode());
    }

    #[tokio::test]
    async fn test_run_loop_probes_periodically() {
        let backend = Arc::new(MockBackend::new());
        let monitor = Arc::new(NetworkMonitor::new(
            backend.clone(),
            MonitorConfig {
                probe_interval: Duration::from_millis(10),
            },
        ));

        let handle = tokio::spawn(monitor.clone().run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(backend.health_checks() >= 2);
        assert!(monitor.status().last_checked.is_some());
    }
}

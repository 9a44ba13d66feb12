//! Retry policy with exponential backoff.
//!
//! Two consumers share this policy: the engine's in-attempt retry loop
//! (jittered sleeps between tries of one record) and the failure queue's
//! persisted wall-clock schedule (exact doubling, no jitter, so the
//! on-disk `next_retry_time` survives restarts unchanged).

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use invigil_common::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum tries per record, first attempt included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    /// Whether to add jitter to in-flight retry sleeps.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a retry configuration with the given attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
            jitter: true,
        }
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sleep duration before retry number `attempt` (0-based), jittered
    /// when configured.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(30) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // +/- 25%
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Wall-clock schedule for a persisted failure entry:
    /// `last_attempt + base_delay * multiplier^(attempt_count - 1)`.
    ///
    /// No jitter, so the stored schedule is reproducible across restarts.
    pub fn next_retry_time(
        &self,
        last_attempt: DateTime<Utc>,
        attempt_count: u32,
    ) -> DateTime<Utc> {
        let exponent = attempt_count.saturating_sub(1).min(30);
        let delay_ms = (self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent as i32))
        .min(self.max_delay.as_millis() as f64);

        last_attempt + chrono::Duration::milliseconds(delay_ms as i64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Retry executor for running operations with retry logic.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying transient failures up to the
    /// attempt ceiling.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_counted(operation).await.0
    }

    /// Like [`execute`](Self::execute), also reporting how many attempts
    /// were made (at least 1).
    pub async fn execute_counted<F, Fut, T>(&self, operation: F) -> (Result<T>, u32)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Operation succeeded after retries");
                    }
                    return (Ok(result), attempt + 1);
                }
                Err(err) => {
                    attempt += 1;

                    if !err.is_retryable() {
                        return (Err(err), attempt);
                    }

                    if attempt >= self.config.max_attempts {
                        warn!(
                            attempts = attempt,
                            error = %err,
                            "Operation failed after exhausting retries"
                        );
                        return (Err(err), attempt);
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        error = %err,
                        delay = ?delay,
                        "Attempt failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invigil_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation_without_jitter() {
        let config = RetryConfig::new(5)
            .with_base_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new(10)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(false);

        // 1 * 2^9 = 512 seconds, capped at 10
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(10));
    }

    #[test]
    fn test_next_retry_time_doubles_per_attempt() {
        let config = RetryConfig::default();
        let last = Utc::now();

        // base 2000ms: attempt 1 -> +2s, attempt 2 -> +4s, attempt 3 -> +8s
        assert_eq!(
            config.next_retry_time(last, 1) - last,
            chrono::Duration::seconds(2)
        );
        assert_eq!(
            config.next_retry_time(last, 2) - last,
            chrono::Duration::seconds(4)
        );
        assert_eq!(
            config.next_retry_time(last, 3) - last,
            chrono::Duration::seconds(8)
        );
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let executor = RetryExecutor::default();

        let result: Result<i32> = executor.execute(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_on_transient_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let config = RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false);
        let executor = RetryExecutor::new(config);

        let result: Result<i32> = executor
            .execute(move || {
                let count = count_clone.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst);
                    if current < 2 {
                        Err(Error::TransientSync("Connection failed".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let executor = RetryExecutor::default();

        let (result, attempts): (Result<i32>, u32) = executor
            .execute_counted(move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::PermanentSync("Unauthorized".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_ceiling() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let config = RetryConfig::new(3).with_base_delay(Duration::from_millis(1));
        let executor = RetryExecutor::new(config);

        let (result, attempts): (Result<i32>, u32) = executor
            .execute_counted(move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::TransientSync("Always fails".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }
}

//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the staged manager and the worker pool.
///
/// Durations are millisecond-denominated so the struct round-trips through
/// plain config files. `speed_factor` divides in-process retry sleeps and
/// exists for tests; production configs leave it at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of queue workers.
    pub worker_count: usize,
    /// Global per-operation processing window in milliseconds.
    pub operation_timeout_ms: u64,
    /// Wall-clock ceiling of the bounded in-process retry loop, in
    /// milliseconds.
    pub retry_ceiling_ms: u64,
    /// Fixed delay returned after a transient storage failure, in
    /// milliseconds.
    pub storage_backoff_ms: u64,
    /// Divisor applied to in-process retry sleeps.
    pub speed_factor: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            operation_timeout_ms: 24 * 60 * 60 * 1000,
            retry_ceiling_ms: 10 * 60 * 1000,
            storage_backoff_ms: 1000,
            speed_factor: 1,
        }
    }
}

impl EngineConfig {
    /// Creates a config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Sets the global operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the in-process retry ceiling.
    #[must_use]
    pub fn with_retry_ceiling(mut self, ceiling: Duration) -> Self {
        self.retry_ceiling_ms = ceiling.as_millis() as u64;
        self
    }

    /// Sets the transient-storage backoff.
    #[must_use]
    pub fn with_storage_backoff(mut self, backoff: Duration) -> Self {
        self.storage_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Sets the retry-sleep divisor.
    #[must_use]
    pub fn with_speed_factor(mut self, factor: u64) -> Self {
        self.speed_factor = factor.max(1);
        self
    }

    /// The global operation timeout.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// The in-process retry ceiling.
    #[must_use]
    pub fn retry_ceiling(&self) -> Duration {
        Duration::from_millis(self.retry_ceiling_ms)
    }

    /// The transient-storage backoff.
    #[must_use]
    pub fn storage_backoff(&self) -> Duration {
        Duration::from_millis(self.storage_backoff_ms)
    }

    /// Scales an in-process retry sleep by the speed factor.
    #[must_use]
    pub fn scale(&self, delay: Duration) -> Duration {
        delay / self.speed_factor.max(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.operation_timeout(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.retry_ceiling(), Duration::from_secs(600));
        assert_eq!(config.storage_backoff(), Duration::from_secs(1));
        assert_eq!(config.speed_factor, 1);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_worker_count(10)
            .with_operation_timeout(Duration::from_secs(3))
            .with_retry_ceiling(Duration::from_secs(60))
            .with_storage_backoff(Duration::from_millis(250))
            .with_speed_factor(0);

        assert_eq!(config.worker_count, 10);
        assert_eq!(config.operation_timeout(), Duration::from_secs(3));
        assert_eq!(config.retry_ceiling(), Duration::from_secs(60));
        assert_eq!(config.storage_backoff(), Duration::from_millis(250));
        // A zero factor is clamped rather than dividing by zero.
        assert_eq!(config.speed_factor, 1);
    }

    #[test]
    fn test_scale() {
        let config = EngineConfig::new().with_speed_factor(10);
        assert_eq!(config.scale(Duration::from_secs(1)), Duration::from_millis(100));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = EngineConfig::new().with_worker_count(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

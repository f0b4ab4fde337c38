//! Worker configuration loaded from environment variables.

use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long to wait between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Attempts before a job is marked failed for good.
    pub max_attempts: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `WORKER_POLL_INTERVAL_MS` | `1000`  |
    /// | `WORKER_MAX_ATTEMPTS`     | `3`     |
    pub fn from_env() -> Self {
        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let max_attempts = std::env::var("WORKER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &i32| *n > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_poll_every_second() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 3);
    }
}

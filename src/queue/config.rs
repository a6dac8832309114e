//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max jobs running at the same time; also caps pending + running at push
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Period between stats events, in milliseconds
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_concurrency_limit() -> usize {
    20
}

fn default_stats_interval_ms() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 20,
            stats_interval_ms: 300,
        }
    }
}

impl QueueConfig {
    /// Replace unusable values with defaults. Bad options are a warning,
    /// never an error: the queue always comes up.
    pub fn normalized(mut self) -> Self {
        if self.concurrency_limit == 0 {
            self.concurrency_limit = default_concurrency_limit();
            warn!(
                "concurrency_limit must be positive, falling back to default ({})",
                self.concurrency_limit
            );
        }
        if self.stats_interval_ms == 0 {
            self.stats_interval_ms = default_stats_interval_ms();
            warn!(
                "stats_interval_ms must be positive, falling back to default ({})",
                self.stats_interval_ms
            );
        }
        self
    }

    /// Get the stats period as a Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency_limit, 20);
        assert_eq!(config.stats_interval_ms, 300);
    }

    #[test]
    fn test_normalized_replaces_zeroes() {
        let config = QueueConfig {
            concurrency_limit: 0,
            stats_interval_ms: 0,
        }
        .normalized();

        assert_eq!(config.concurrency_limit, 20);
        assert_eq!(config.stats_interval_ms, 300);
    }

    #[test]
    fn test_normalized_keeps_valid_values() {
        let config = QueueConfig {
            concurrency_limit: 3,
            stats_interval_ms: 2000,
        }
        .normalized();

        assert_eq!(config.concurrency_limit, 3);
        assert_eq!(config.stats_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let config: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.concurrency_limit, 20);
        assert_eq!(config.stats_interval_ms, 300);
    }
}

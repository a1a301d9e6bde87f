//! Dispatcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::owner_quota::OwnerQuotaConfig;

/// Default number of workers (and concurrency slots)
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default external quota, in requests per minute
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 15;

/// Dispatch pool configuration
///
/// # Example
///
/// ```
/// use everruns_dispatch::DispatcherConfig;
/// use std::time::Duration;
///
/// let config = DispatcherConfig::default()
///     .with_worker_count(5)
///     .with_queue_capacity(500)
///     .with_requests_per_minute(60);
///
/// assert_eq!(config.min_interval, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Number of worker tasks, also the number of concurrency slots
    pub worker_count: usize,

    /// Maximum number of pending jobs
    pub queue_capacity: usize,

    /// Minimum interval between job starts across the whole pool (zero disables pacing)
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Timeout used by callers that shut the pool down with the configured value
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Optional per-owner submission quota
    #[serde(default)]
    pub owner_quota: Option<OwnerQuotaConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_interval: interval_for_quota(DEFAULT_REQUESTS_PER_MINUTE),
            shutdown_timeout: Duration::from_secs(30),
            owner_quota: None,
        }
    }
}

impl DispatcherConfig {
    /// Create a new dispatcher configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `DISPATCH_WORKERS`: Worker count (default: 3)
    /// - `DISPATCH_QUEUE_CAPACITY`: Queue capacity (default: 100)
    /// - `DISPATCH_REQUESTS_PER_MINUTE`: External quota; 0 disables pacing (default: 15)
    /// - `DISPATCH_SHUTDOWN_TIMEOUT_SECS`: Graceful shutdown timeout (default: 30)
    /// - `DISPATCH_OWNER_QUOTA`: Max submissions per owner per window (default: unset)
    /// - `DISPATCH_OWNER_QUOTA_WINDOW_SECS`: Owner quota window (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_count = env_parse("DISPATCH_WORKERS").unwrap_or(defaults.worker_count);
        let queue_capacity =
            env_parse("DISPATCH_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity);
        let min_interval = env_parse::<u32>("DISPATCH_REQUESTS_PER_MINUTE")
            .map(interval_for_quota)
            .unwrap_or(defaults.min_interval);
        let shutdown_timeout = env_parse("DISPATCH_SHUTDOWN_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        let owner_quota = env_parse::<u32>("DISPATCH_OWNER_QUOTA").map(|max_jobs| {
            let window = env_parse("DISPATCH_OWNER_QUOTA_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60));
            OwnerQuotaConfig::new(max_jobs, window)
        });

        Self {
            worker_count,
            queue_capacity,
            min_interval,
            shutdown_timeout,
            owner_quota,
        }
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the minimum interval between job starts
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Derive the minimum interval from an external requests-per-minute quota
    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.min_interval = interval_for_quota(requests_per_minute);
        self
    }

    /// Disable pacing
    pub fn without_pacing(mut self) -> Self {
        self.min_interval = Duration::ZERO;
        self
    }

    /// Set the shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the per-owner quota
    pub fn with_owner_quota(mut self, quota: OwnerQuotaConfig) -> Self {
        self.owner_quota = Some(quota);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if let Some(quota) = &self.owner_quota {
            quota.validate()?;
        }
        Ok(())
    }
}

/// Interval between job starts for a requests-per-minute quota (0 means unthrottled)
pub fn interval_for_quota(requests_per_minute: u32) -> Duration {
    if requests_per_minute == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(60.0 / f64::from(requests_per_minute))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.min_interval, Duration::from_secs(4));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.owner_quota.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = DispatcherConfig::new()
            .with_worker_count(8)
            .with_queue_capacity(20)
            .with_min_interval(Duration::from_millis(250))
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_capacity, 20);
        assert_eq!(config.min_interval, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_clamps_to_one() {
        let config = DispatcherConfig::new()
            .with_worker_count(0)
            .with_queue_capacity(0);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let config = DispatcherConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = DispatcherConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_for_quota() {
        assert_eq!(interval_for_quota(60), Duration::from_secs(1));
        assert_eq!(interval_for_quota(120), Duration::from_millis(500));
        assert_eq!(interval_for_quota(0), Duration::ZERO);
        assert!(DispatcherConfig::new().without_pacing().min_interval.is_zero());
    }

    #[test]
    fn test_serde_durations_as_millis() {
        let config = DispatcherConfig::new().with_requests_per_minute(30);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["min_interval"], 2000);
        assert_eq!(json["shutdown_timeout"], 30000);

        let parsed: DispatcherConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}

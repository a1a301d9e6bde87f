//! Per-owner submission quota
//!
//! Fixed-window counters keyed by owner ID. The window is reset by a sweep
//! task that the pool spawns on its own task tracker and stops with the same
//! shutdown signal as the workers.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::duration_millis;
use crate::error::ConfigError;

/// Owner quota configuration
///
/// # Example
///
/// ```
/// use everruns_dispatch::OwnerQuotaConfig;
/// use std::time::Duration;
///
/// // At most 10 jobs per owner per minute
/// let quota = OwnerQuotaConfig::new(10, Duration::from_secs(60));
/// assert!(quota.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerQuotaConfig {
    /// Maximum submissions per owner per window
    pub max_jobs: u32,

    /// Window length; counters reset when it elapses
    #[serde(with = "duration_millis")]
    pub window: Duration,
}

impl OwnerQuotaConfig {
    /// Create a new owner quota configuration
    pub fn new(max_jobs: u32, window: Duration) -> Self {
        Self { max_jobs, window }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_jobs == 0 {
            return Err(ConfigError::Invalid(
                "owner quota max_jobs must be at least 1".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(ConfigError::Invalid(
                "owner quota window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Fixed-window submission counters per owner
#[derive(Debug)]
pub struct OwnerQuota {
    config: OwnerQuotaConfig,
    counts: DashMap<String, u32>,
}

impl OwnerQuota {
    /// Create an empty quota tracker
    pub fn new(config: OwnerQuotaConfig) -> Self {
        Self {
            config,
            counts: DashMap::new(),
        }
    }

    /// The configured limit per window
    pub fn limit(&self) -> u32 {
        self.config.max_jobs
    }

    /// The configured window
    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Count a submission; false if the owner is already at its limit
    pub fn try_admit(&self, owner_id: &str) -> bool {
        let mut count = self.counts.entry(owner_id.to_string()).or_insert(0);
        if *count >= self.config.max_jobs {
            return false;
        }
        *count += 1;
        true
    }

    /// Give back a submission that was admitted but never enqueued
    pub fn refund(&self, owner_id: &str) {
        if let Some(mut count) = self.counts.get_mut(owner_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Submissions counted for an owner in the current window
    pub fn count(&self, owner_id: &str) -> u32 {
        self.counts.get(owner_id).map(|c| *c).unwrap_or(0)
    }

    /// Number of owners tracked in the current window
    pub fn tracked_owners(&self) -> usize {
        self.counts.len()
    }

    /// Reset every counter, starting a new window
    pub fn sweep(&self) -> usize {
        let owners = self.counts.len();
        self.counts.clear();
        owners
    }

    /// Sweep once per window until shutdown is signaled
    pub(crate) async fn run_sweeper(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let window = self.config.window;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let owners = self.sweep();
                    trace!(owners, "Owner quota window reset");
                }
                _ = shutdown_rx.changed() => {
                    debug!("Owner quota sweeper: shutdown requested");
                    break;
                }
            }
        }

        debug!("Owner quota sweeper exited");
    }
}

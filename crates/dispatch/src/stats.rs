//! Pool statistics
//!
//! All mutations go through one exclusive lock; snapshots take the shared lock.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Jobs whose body completed successfully
    pub total_processed: u64,
    /// Jobs that were cancelled, returned an error, or panicked
    pub total_failed: u64,
    /// Jobs whose body ran, successfully or not; cancelled jobs are excluded
    pub total_executed: u64,
    /// Jobs ever admitted to the queue
    pub total_queued: u64,
    /// Jobs admitted but not yet picked up by a worker
    pub current_in_queue: usize,
    /// Jobs currently holding a concurrency slot
    pub currently_processing: usize,
    /// Cumulative execution time of jobs whose body ran
    #[serde(with = "duration_millis")]
    pub total_time: Duration,
}

impl Stats {
    /// Jobs that left the queue and reached an outcome
    pub fn total_completed(&self) -> u64 {
        self.total_processed + self.total_failed
    }

    /// Mean execution time per executed job (zero when none ran)
    ///
    /// Jobs skipped as cancelled never ran, so they add neither time nor a sample.
    pub fn average_processing_time(&self) -> Duration {
        match u32::try_from(self.total_executed) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_time / count,
            Err(_) => Duration::from_secs_f64(
                self.total_time.as_secs_f64() / self.total_executed as f64,
            ),
        }
    }
}

/// Shared, lock-protected statistics
#[derive(Debug, Default)]
pub struct StatsRegistry {
    inner: RwLock<Stats>,
}

impl StatsRegistry {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current values
    pub fn snapshot(&self) -> Stats {
        *self.inner.read()
    }

    /// Mean execution time per completed job
    pub fn average_processing_time(&self) -> Duration {
        self.inner.read().average_processing_time()
    }

    /// A job was admitted to the queue
    pub fn job_queued(&self) {
        let mut stats = self.inner.write();
        stats.total_queued += 1;
        stats.current_in_queue += 1;
    }

    /// A job left the queue (picked up, or drained at shutdown)
    pub fn job_dequeued(&self) {
        let mut stats = self.inner.write();
        stats.current_in_queue = stats.current_in_queue.saturating_sub(1);
    }

    /// A worker took a concurrency slot
    pub fn processing_started(&self) {
        self.inner.write().currently_processing += 1;
    }

    /// Record a job whose body ran and release its processing count in one step
    pub fn processing_finished(&self, success: bool, elapsed: Duration) {
        let mut stats = self.inner.write();
        if success {
            stats.total_processed += 1;
        } else {
            stats.total_failed += 1;
        }
        stats.total_executed += 1;
        stats.total_time += elapsed;
        stats.currently_processing = stats.currently_processing.saturating_sub(1);
    }

    /// Record a job skipped as cancelled: failed, but not timed
    pub fn processing_skipped(&self) {
        let mut stats = self.inner.write();
        stats.total_failed += 1;
        stats.currently_processing = stats.currently_processing.saturating_sub(1);
    }
}

//! Dispatcher error types
//!
//! Submission and shutdown errors are returned synchronously to the caller.
//! Execution outcomes travel only through the job's [`JobHandle`](crate::JobHandle).

use std::time::Duration;

/// Submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Queue is at capacity; retry later or shed load
    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Shutdown has begun; no new jobs are admitted
    #[error("dispatch pool is shutting down")]
    ShuttingDown,

    /// Owner exceeded its submission quota for the current window
    #[error("owner {owner_id} exceeded its quota of {limit} jobs per window")]
    OwnerRateLimited { owner_id: String, limit: u32 },
}

/// Job execution errors, delivered through the job handle
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Cancellation was signaled before the job started executing
    #[error("job was cancelled before execution")]
    Cancelled,

    /// The job body returned an error
    #[error("job execution failed: {0}")]
    Execution(#[source] anyhow::Error),

    /// The job body panicked
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The pool shut down before the job was dequeued
    #[error("dispatch pool shut down before the job ran")]
    ShuttingDown,
}

impl JobError {
    /// Whether the job body never ran
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ShuttingDown)
    }
}

/// Shutdown errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    /// Workers did not drain before the timeout; they keep running in the background
    #[error("graceful shutdown timed out after {timeout:?} ({busy_workers} workers still busy)")]
    Timeout {
        timeout: Duration,
        busy_workers: usize,
    },
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("invalid dispatcher configuration: {0}")]
    Invalid(String),
}

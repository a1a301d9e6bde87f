//! Dispatch pool
//!
//! Owns the queue, workers, pacing limiter, slots and statistics, and
//! coordinates startup, submission and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::DispatcherConfig;
use crate::error::{ConfigError, JobError, ShutdownError, SubmitError};
use crate::job::{Job, JobHandle, QueuedJob};
use crate::limiter::RateLimiter;
use crate::owner_quota::OwnerQuota;
use crate::queue::{JobQueue, PushError};
use crate::slots::ConcurrencySlots;
use crate::stats::{Stats, StatsRegistry};
use crate::status::PoolStatus;
use crate::worker::{Worker, WorkerContext};

/// Dispatch pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Accepting and executing jobs
    Running,
    /// Shutdown requested; finishing in-hand jobs, not accepting new ones
    Draining,
    /// All workers have exited
    Stopped,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Bounded, rate-limited job dispatcher
///
/// Construct once at startup and share by `Arc` with every producer.
///
/// # Example
///
/// ```no_run
/// use everruns_dispatch::{DispatchPool, DispatcherConfig, Job};
/// use std::time::Duration;
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = DispatcherConfig::default()
///     .with_worker_count(3)
///     .with_queue_capacity(100)
///     .with_requests_per_minute(15);
///
/// let pool = DispatchPool::new(config)?;
///
/// let handle = pool.submit(Job::new("job-1", "user-1", "payload", |p| async move {
///     Ok(p.to_uppercase())
/// }))?;
///
/// assert_eq!(handle.await?, "PAYLOAD");
///
/// pool.shutdown(Duration::from_secs(30)).await?;
/// # Ok(())
/// # }
/// ```
pub struct DispatchPool {
    config: DispatcherConfig,
    queue: Arc<JobQueue<QueuedJob>>,
    slots: ConcurrencySlots,
    limiter: Arc<RateLimiter>,
    stats: Arc<StatsRegistry>,
    owner_quota: Option<Arc<OwnerQuota>>,
    shutdown_tx: watch::Sender<bool>,
    state: parking_lot::RwLock<PoolState>,
    tracker: TaskTracker,
    started_at: DateTime<Utc>,
}

impl DispatchPool {
    /// Validate `config` and start the workers
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(workers = config.worker_count, capacity = config.queue_capacity))]
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let slots = ConcurrencySlots::new(config.worker_count);
        let limiter = Arc::new(RateLimiter::new(config.min_interval));
        let stats = Arc::new(StatsRegistry::new());
        let owner_quota = config
            .owner_quota
            .clone()
            .map(|quota| Arc::new(OwnerQuota::new(quota)));
        let tracker = TaskTracker::new();

        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            slots: slots.clone(),
            limiter: Arc::clone(&limiter),
            stats: Arc::clone(&stats),
        };
        for id in 0..config.worker_count {
            tracker.spawn(Worker::new(id, ctx.clone(), shutdown_rx.clone()).run());
        }

        if let Some(quota) = &owner_quota {
            let quota = Arc::clone(quota);
            let shutdown_rx = shutdown_rx.clone();
            tracker.spawn(async move { quota.run_sweeper(shutdown_rx).await });
        }

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            min_interval_ms = config.min_interval.as_millis() as u64,
            owner_quota = ?config.owner_quota,
            "Dispatch pool started"
        );

        Ok(Self {
            config,
            queue,
            slots,
            limiter,
            stats,
            owner_quota,
            shutdown_tx,
            state: parking_lot::RwLock::new(PoolState::Running),
            tracker,
            started_at: Utc::now(),
        })
    }

    /// Enqueue a job without blocking
    ///
    /// Returns a handle that resolves once the job has run, been cancelled,
    /// or been discarded by shutdown.
    pub fn submit<T: Send + 'static>(&self, job: Job<T>) -> Result<JobHandle<T>, SubmitError> {
        if self.queue.is_closed() {
            return Err(SubmitError::ShuttingDown);
        }

        if let Some(quota) = &self.owner_quota {
            if !quota.try_admit(job.owner_id()) {
                debug!(job_id = %job.id(), owner_id = %job.owner_id(), "Owner over quota, rejecting");
                return Err(SubmitError::OwnerRateLimited {
                    owner_id: job.owner_id().to_string(),
                    limit: quota.limit(),
                });
            }
        }

        let (queued, handle) = QueuedJob::from_job(job);
        match self.queue.try_push(queued) {
            Ok(()) => {
                self.stats.job_queued();
                debug!(job_id = %handle.id(), "Job queued");
                Ok(handle)
            }
            Err(rejected) => {
                let full = matches!(rejected, PushError::Full(_));
                let job = rejected.into_inner();
                if let Some(quota) = &self.owner_quota {
                    quota.refund(&job.owner_id);
                }
                if full {
                    warn!(
                        job_id = %job.id,
                        capacity = self.queue.capacity(),
                        "Job queue full, rejecting"
                    );
                    Err(SubmitError::QueueFull {
                        capacity: self.queue.capacity(),
                    })
                } else {
                    Err(SubmitError::ShuttingDown)
                }
            }
        }
    }

    /// Stop accepting jobs, then wait up to `timeout` for workers to finish
    ///
    /// Jobs that were still queued resolve with [`JobError::ShuttingDown`].
    /// Safe to call repeatedly; after a timeout a later call waits again.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let first_call = {
            let mut state = self.state.write();
            let first = *state == PoolState::Running;
            if first {
                *state = PoolState::Draining;
            }
            first
        };

        if first_call {
            info!("Initiating graceful shutdown");

            let abandoned = self.queue.close();
            if !abandoned.is_empty() {
                info!(count = abandoned.len(), "Discarding queued jobs");
            }
            for job in abandoned {
                self.stats.job_dequeued();
                job.reject(JobError::ShuttingDown);
            }

            // Receivers all gone means every worker already exited
            let _ = self.shutdown_tx.send(true);
            self.tracker.close();
        }

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            let busy_workers = self.slots.in_use();
            warn!(busy_workers, ?timeout, "Shutdown timeout reached");
            return Err(ShutdownError::Timeout {
                timeout,
                busy_workers,
            });
        }

        *self.state.write() = PoolState::Stopped;
        info!("Dispatch pool stopped");
        Ok(())
    }

    /// Shut down using the configured timeout
    pub async fn shutdown_with_default_timeout(&self) -> Result<(), ShutdownError> {
        self.shutdown(self.config.shutdown_timeout).await
    }

    /// Current statistics
    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Jobs waiting in the queue
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of queued jobs
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Whether a submission would be rejected as full
    pub fn is_queue_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Mean execution time per completed job
    pub fn average_processing_time(&self) -> Duration {
        self.stats.average_processing_time()
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Minimum interval between job starts
    pub fn min_interval(&self) -> Duration {
        self.limiter.interval()
    }

    /// Lifecycle state
    ///
    /// Reports `Stopped` as soon as every worker has exited, even when the
    /// `shutdown` call that started the drain gave up on its timeout.
    pub fn state(&self) -> PoolState {
        match *self.state.read() {
            PoolState::Draining if self.tracker.is_closed() && self.tracker.is_empty() => {
                PoolState::Stopped
            }
            state => state,
        }
    }

    /// Whether new jobs are accepted
    pub fn is_accepting(&self) -> bool {
        !self.queue.is_closed()
    }

    /// The configuration the pool was built with
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Status snapshot for reporting
    pub fn status(&self) -> PoolStatus {
        let stats = self.stats();
        let now = Utc::now();
        PoolStatus {
            state: self.state(),
            worker_count: self.worker_count(),
            busy_workers: self.slots.in_use(),
            queue_size: self.queue_size(),
            queue_capacity: self.queue_capacity(),
            queue_full: self.is_queue_full(),
            min_interval_ms: self.min_interval().as_millis() as u64,
            average_processing_time_ms: stats.average_processing_time().as_millis() as u64,
            stats,
            started_at: self.started_at,
            uptime_secs: now
                .signed_duration_since(self.started_at)
                .num_seconds()
                .max(0) as u64,
        }
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("state", &self.state())
            .field("worker_count", &self.config.worker_count)
            .field("queue_size", &self.queue_size())
            .field("queue_capacity", &self.queue_capacity())
            .finish_non_exhaustive()
    }
}

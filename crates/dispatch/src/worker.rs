//! Worker loop
//!
//! ```text
//! WaitForJobOrStop ──stop──► exit
//!        │ job
//!        ▼
//! AcquireSlot → DecrementQueued → WaitForPacingToken → CheckCancellation
//!        │                                                  │
//!        │                               Execute | SkipAsCancelled
//!        ▼                                                  ▼
//!      loop ◄── DeliverResult ◄── ReleaseSlot ◄── RecordOutcome
//! ```
//!
//! The stop signal is only observed while idle. A job in hand always runs to
//! its handle before the worker exits.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::error::JobError;
use crate::job::{JobOutcome, QueuedJob};
use crate::limiter::RateLimiter;
use crate::queue::JobQueue;
use crate::slots::ConcurrencySlots;
use crate::stats::StatsRegistry;

/// Shared resources every worker in a pool draws from
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<JobQueue<QueuedJob>>,
    pub(crate) slots: ConcurrencySlots,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) stats: Arc<StatsRegistry>,
}

/// One long-lived worker task
pub(crate) struct Worker {
    id: usize,
    ctx: WorkerContext,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) fn new(id: usize, ctx: WorkerContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            id,
            ctx,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signaled (or the pool is dropped)
    pub(crate) async fn run(mut self) {
        debug!(worker_id = self.id, "Worker started");

        while let Some(job) = self.next_job().await {
            self.process(job).await;
        }

        debug!(worker_id = self.id, "Worker exited");
    }

    /// Wait for a job, or `None` once stop is requested
    async fn next_job(&mut self) -> Option<QueuedJob> {
        if *self.shutdown_rx.borrow() {
            return None;
        }

        tokio::select! {
            biased;
            // An Err means the pool was dropped without a shutdown
            _ = self.shutdown_rx.changed() => None,
            job = self.ctx.queue.pop() => Some(job),
        }
    }

    async fn process(&self, job: QueuedJob) {
        let worker_id = self.id;

        let permit = match self.ctx.slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                // Slots are never closed while workers run; resolve the job rather than lose it
                error!(worker_id, job_id = %job.id, "Failed to acquire concurrency slot: {}", e);
                self.ctx.stats.job_dequeued();
                job.reject(JobError::ShuttingDown);
                return;
            }
        };
        self.ctx.stats.job_dequeued();
        self.ctx.stats.processing_started();

        self.ctx.limiter.acquire().await;

        let queued_for = job.enqueued_at.elapsed();
        let started = Instant::now();

        if job.is_cancelled() {
            debug!(worker_id, job_id = %job.id, owner_id = %job.owner_id, "Job cancelled before execution");
            self.ctx.stats.processing_skipped();
            drop(permit);
            job.reject(JobError::Cancelled);
            return;
        }

        trace!(
            worker_id,
            job_id = %job.id,
            owner_id = %job.owner_id,
            queued_ms = queued_for.as_millis() as u64,
            "Executing job"
        );

        let job_id = job.id.clone();
        let finished = job.run().await;
        let elapsed = started.elapsed();

        match finished.outcome {
            JobOutcome::Succeeded => {
                debug!(worker_id, %job_id, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
            }
            JobOutcome::Failed => {
                warn!(worker_id, %job_id, elapsed_ms = elapsed.as_millis() as u64, "Job failed");
            }
            JobOutcome::Panicked => {
                error!(worker_id, %job_id, "Job panicked");
            }
        }

        // Account before delivering, so a caller who awaited the handle sees the job counted
        self.ctx
            .stats
            .processing_finished(finished.outcome.is_success(), elapsed);
        drop(permit);
        finished.deliver();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::Job;

    fn context(capacity: usize, interval: Duration) -> WorkerContext {
        WorkerContext {
            queue: Arc::new(JobQueue::new(capacity)),
            slots: ConcurrencySlots::new(1),
            limiter: Arc::new(RateLimiter::new(interval)),
            stats: Arc::new(StatsRegistry::new()),
        }
    }

    fn enqueue<T: Send + 'static>(ctx: &WorkerContext, job: Job<T>) -> crate::JobHandle<T> {
        let (queued, handle) = QueuedJob::from_job(job);
        ctx.queue.try_push(queued).unwrap();
        ctx.stats.job_queued();
        handle
    }

    #[tokio::test]
    async fn test_worker_processes_and_records() {
        let ctx = context(4, Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Worker::new(0, ctx.clone(), shutdown_rx).run());

        let ok = enqueue(&ctx, Job::new("ok", "o", 2u32, |n| async move { Ok(n * 2) }));
        let bad = enqueue(
            &ctx,
            Job::<u32>::new("bad", "o", (), |_| async { Err(anyhow::anyhow!("nope")) }),
        );

        assert_eq!(ok.await.unwrap(), 4);
        assert!(matches!(bad.await, Err(JobError::Execution(_))));

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.current_in_queue, 0);
        assert_eq!(stats.currently_processing, 0);

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_worker_exits_on_stop() {
        let ctx = context(1, Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Worker::new(0, ctx, shutdown_rx).run());

        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_exits_when_pool_dropped() {
        let ctx = context(1, Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Worker::new(0, ctx, shutdown_rx).run());

        drop(shutdown_tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_job_skips_body() {
        let ctx = context(2, Duration::ZERO);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(Worker::new(0, ctx.clone(), shutdown_rx).run());

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let job = {
            let ran = Arc::clone(&ran);
            Job::new("cancelled", "o", (), move |_| async move {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
        };
        job.cancellation_token().cancel();
        let handle = enqueue(&ctx, job);

        assert!(matches!(handle.await, Err(JobError::Cancelled)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(ctx.stats.snapshot().total_failed, 1);
        assert_eq!(ctx.stats.snapshot().total_processed, 0);
    }
}

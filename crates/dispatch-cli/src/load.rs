// Synthetic load driver
//
// Submits simulated third-party calls to a dispatch pool, backing off when the
// pool pushes back, and tallies how each job ended.

use std::time::Duration;

use everruns_dispatch::{CancellationToken, DispatchPool, Job, JobError, JobHandle, SubmitError};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// What to submit
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub jobs: usize,
    pub job_duration: Duration,
    /// Probability in [0, 1] that a job returns an error
    pub failure_rate: f64,
    pub owners: usize,
}

impl LoadPlan {
    fn owner_for(&self, index: usize) -> String {
        format!("owner-{}", index % self.owners.max(1))
    }
}

/// Outcome tally for a load run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs resolved without their body running (cancelled or discarded at shutdown)
    pub skipped: usize,
    /// Jobs still pending when the run was stopped
    pub unresolved: usize,
    pub queue_full_retries: usize,
    pub owner_limited_retries: usize,
}

impl LoadReport {
    fn record(&mut self, result: &Result<Duration, JobError>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(e) if e.is_skipped() => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Payload of a synthetic job
#[derive(Debug, Clone, Copy)]
struct SimulatedCall {
    latency: Duration,
    fail: bool,
}

async fn simulated_call(call: SimulatedCall) -> anyhow::Result<Duration> {
    tokio::time::sleep(call.latency).await;
    if call.fail {
        anyhow::bail!("simulated upstream error");
    }
    Ok(call.latency)
}

/// Submit every job in `plan` and wait for all of them to resolve
///
/// Stops submitting (but still awaits what was admitted) once the pool
/// starts shutting down. Cancelling `stop` ends the run early; whatever
/// has not resolved by then is counted as unresolved.
pub async fn run(pool: &DispatchPool, plan: &LoadPlan, stop: CancellationToken) -> LoadReport {
    let mut report = LoadReport::default();
    let mut pending = FuturesUnordered::new();

    info!(
        jobs = plan.jobs,
        owners = plan.owners,
        failure_rate = plan.failure_rate,
        "Starting load run"
    );

    for index in 0..plan.jobs {
        if stop.is_cancelled() {
            break;
        }
        let call = SimulatedCall {
            latency: plan.job_duration,
            fail: rand::thread_rng().gen_bool(plan.failure_rate.clamp(0.0, 1.0)),
        };
        let owner = plan.owner_for(index);

        match submit_with_backoff(pool, index, &owner, call, &stop, &mut report).await {
            Submission::Admitted(handle) => {
                report.submitted += 1;
                pending.push(handle);
            }
            Submission::ShuttingDown => {
                warn!(submitted = report.submitted, "Pool is shutting down, stopping submission");
                break;
            }
            Submission::Stopped => break,
        }

        // Drain whatever already finished so the set does not grow unbounded
        while let Some(Some(result)) = pending.next().now_or_never() {
            report.record(&result);
        }
    }

    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(result) => report.record(&result),
                None => break,
            },
            _ = stop.cancelled() => {
                report.unresolved = pending.len();
                warn!(unresolved = report.unresolved, "Load run stopped early");
                break;
            }
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        retries = report.queue_full_retries + report.owner_limited_retries,
        "Load run finished"
    );
    report
}

enum Submission {
    Admitted(JobHandle<Duration>),
    ShuttingDown,
    Stopped,
}

async fn submit_with_backoff(
    pool: &DispatchPool,
    index: usize,
    owner: &str,
    call: SimulatedCall,
    stop: &CancellationToken,
    report: &mut LoadReport,
) -> Submission {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let job = Job::new(format!("load-{index}"), owner, call, simulated_call);
        match pool.submit(job) {
            Ok(handle) => return Submission::Admitted(handle),
            Err(SubmitError::ShuttingDown) => return Submission::ShuttingDown,
            Err(SubmitError::QueueFull { capacity }) => {
                report.queue_full_retries += 1;
                debug!(index, capacity, ?backoff, "Queue full, backing off");
            }
            Err(SubmitError::OwnerRateLimited { owner_id, limit }) => {
                report.owner_limited_retries += 1;
                debug!(index, %owner_id, limit, ?backoff, "Owner over quota, backing off");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.cancelled() => return Submission::Stopped,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use everruns_dispatch::{DispatcherConfig, OwnerQuotaConfig};

    fn plan(jobs: usize, failure_rate: f64) -> LoadPlan {
        LoadPlan {
            jobs,
            job_duration: Duration::from_millis(20),
            failure_rate,
            owners: 3,
        }
    }

    #[test]
    fn test_record_sorts_outcomes() {
        let mut report = LoadReport::default();
        report.record(&Ok(Duration::from_millis(5)));
        report.record(&Err(JobError::Cancelled));
        report.record(&Err(JobError::ShuttingDown));
        report.record(&Err(JobError::Panicked("boom".into())));
        report.record(&Err(JobError::Execution(anyhow::anyhow!("503"))));

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_owners_round_robin() {
        let plan = plan(10, 0.0);
        assert_eq!(plan.owner_for(0), "owner-0");
        assert_eq!(plan.owner_for(4), "owner-1");

        let single = LoadPlan { owners: 0, ..plan };
        assert_eq!(single.owner_for(7), "owner-0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_is_retried_until_all_jobs_run() {
        let pool = DispatchPool::new(
            DispatcherConfig::new()
                .with_worker_count(2)
                .with_queue_capacity(2)
                .without_pacing(),
        )
        .unwrap();

        let report = run(&pool, &plan(12, 0.0), CancellationToken::new()).await;

        assert_eq!(report.submitted, 12);
        assert_eq!(report.succeeded, 12);
        assert_eq!(report.failed, 0);
        assert!(report.queue_full_retries > 0);
        assert_eq!(pool.stats().total_processed, 12);

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted() {
        let pool = DispatchPool::new(
            DispatcherConfig::new()
                .with_worker_count(2)
                .with_queue_capacity(20)
                .without_pacing(),
        )
        .unwrap();

        let report = run(&pool, &plan(5, 1.0), CancellationToken::new()).await;

        assert_eq!(report.failed, 5);
        assert_eq!(report.succeeded, 0);
        assert_eq!(pool.stats().total_failed, 5);

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_quota_is_retried() {
        let pool = DispatchPool::new(
            DispatcherConfig::new()
                .with_worker_count(2)
                .with_queue_capacity(20)
                .without_pacing()
                .with_owner_quota(OwnerQuotaConfig::new(1, Duration::from_millis(500))),
        )
        .unwrap();

        let report = run(&pool, &plan(6, 0.0), CancellationToken::new()).await;

        assert_eq!(report.succeeded, 6);
        assert!(report.owner_limited_retries > 0);

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_partial_report() {
        let pool = DispatchPool::new(
            DispatcherConfig::new()
                .with_worker_count(1)
                .with_queue_capacity(2)
                .without_pacing(),
        )
        .unwrap();
        let slow = LoadPlan {
            job_duration: Duration::from_secs(10),
            ..plan(10, 0.0)
        };

        let stop = CancellationToken::new();
        {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                stop.cancel();
            });
        }

        let started = tokio::time::Instant::now();
        let report = run(&pool, &slow, stop).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.submitted >= 2);
        assert!(report.submitted < 10);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.unresolved, report.submitted);
        assert!(report.queue_full_retries > 0);
    }

    #[tokio::test]
    async fn test_already_stopped_submits_nothing() {
        let pool = DispatchPool::new(DispatcherConfig::new().without_pacing()).unwrap();
        let stop = CancellationToken::new();
        stop.cancel();

        let report = run(&pool, &plan(4, 0.0), stop).await;
        assert_eq!(report, LoadReport::default());
        assert_eq!(pool.stats().total_queued, 0);
    }

    #[tokio::test]
    async fn test_stops_submitting_after_shutdown() {
        let pool = DispatchPool::new(DispatcherConfig::new().without_pacing()).unwrap();
        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        let report = run(&pool, &plan(4, 0.0), CancellationToken::new()).await;
        assert_eq!(report, LoadReport::default());
    }
}

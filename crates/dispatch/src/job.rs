//! Jobs and job handles
//!
//! A [`Job`] pairs an opaque payload with an async body. Submitting it yields a
//! [`JobHandle`] that resolves exactly once with the body's result, or with the
//! reason the body never ran.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;

/// Result delivered to a job handle
pub type JobResult<T> = Result<T, JobError>;

type JobBody<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// A unit of work submitted to a [`DispatchPool`](crate::DispatchPool)
///
/// # Example
///
/// ```
/// use everruns_dispatch::Job;
///
/// let job = Job::new("extract-42", "user-7", "https://example.com", |url| async move {
///     Ok(url.len())
/// });
/// assert_eq!(job.id(), "extract-42");
/// ```
pub struct Job<T> {
    id: String,
    owner_id: String,
    cancel: CancellationToken,
    body: JobBody<T>,
}

impl<T: Send + 'static> Job<T> {
    /// Create a job whose body receives `payload`
    pub fn new<P, F, Fut>(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        payload: P,
        body: F,
    ) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            cancel: CancellationToken::new(),
            body: Box::new(move || body(payload).boxed()),
        }
    }

    /// Create a job with a generated ID
    pub fn anonymous<P, F, Fut>(owner_id: impl Into<String>, payload: P, body: F) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(Uuid::now_v7().to_string(), owner_id, payload, body)
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl<T> Job<T> {
    /// Producer-assigned job ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submitting principal
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The job's cancellation token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Handle to a submitted job
///
/// Resolves exactly once. Dropping the handle detaches the job; it still runs.
pub struct JobHandle<T> {
    id: String,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<JobResult<T>>,
}

impl<T> JobHandle<T> {
    /// ID of the submitted job
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation; effective only if the job has not started executing
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = JobResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result_rx).poll(cx).map(|result| {
            // Sender dropped without a result: the job was discarded with the pool
            result.unwrap_or(Err(JobError::ShuttingDown))
        })
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

/// How a dequeued job ended, for accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Succeeded,
    Failed,
    Panicked,
}

impl JobOutcome {
    pub(crate) fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

/// A finished job whose result has not yet been handed to its handle
pub(crate) struct Finished {
    pub(crate) outcome: JobOutcome,
    deliver: Box<dyn FnOnce() + Send>,
}

impl Finished {
    pub(crate) fn deliver(self) {
        (self.deliver)();
    }
}

/// Type-erased job as it sits in the queue
pub(crate) struct QueuedJob {
    pub(crate) id: String,
    pub(crate) owner_id: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) enqueued_at: Instant,
    task: Box<dyn ErasedTask>,
}

trait ErasedTask: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, Finished>;
    fn reject(self: Box<Self>, error: JobError);
}

struct TypedTask<T> {
    body: JobBody<T>,
    result_tx: oneshot::Sender<JobResult<T>>,
}

impl<T: Send + 'static> ErasedTask for TypedTask<T> {
    fn run(self: Box<Self>) -> BoxFuture<'static, Finished> {
        let TypedTask { body, result_tx } = *self;
        async move {
            let result = match AssertUnwindSafe(async move { body().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(JobError::Execution(e)),
                Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
            };
            let outcome = match &result {
                Ok(_) => JobOutcome::Succeeded,
                Err(JobError::Panicked(_)) => JobOutcome::Panicked,
                Err(_) => JobOutcome::Failed,
            };
            Finished {
                outcome,
                deliver: Box::new(move || {
                    // Receiver gone means the caller detached
                    let _ = result_tx.send(result);
                }),
            }
        }
        .boxed()
    }

    fn reject(self: Box<Self>, error: JobError) {
        let _ = self.result_tx.send(Err(error));
    }
}

impl QueuedJob {
    /// Split a job into its queued form and the caller's handle
    pub(crate) fn from_job<T: Send + 'static>(job: Job<T>) -> (Self, JobHandle<T>) {
        let (result_tx, result_rx) = oneshot::channel();
        let handle = JobHandle {
            id: job.id.clone(),
            cancel: job.cancel.clone(),
            result_rx,
        };
        let queued = Self {
            id: job.id,
            owner_id: job.owner_id,
            cancel: job.cancel,
            enqueued_at: Instant::now(),
            task: Box::new(TypedTask {
                body: job.body,
                result_tx,
            }),
        };
        (queued, handle)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Execute the body, catching panics
    pub(crate) fn run(self) -> BoxFuture<'static, Finished> {
        self.task.run()
    }

    /// Resolve the handle without running the body
    pub(crate) fn reject(self, error: JobError) {
        self.task.reject(error);
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

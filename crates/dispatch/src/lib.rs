//! # Rate-limited Job Dispatcher
//!
//! An in-process worker pool for work that calls a quota-limited third-party
//! service (for example an AI API allowing N requests per minute).
//!
//! ## Features
//!
//! - **Backpressure**: fixed-capacity FIFO queue; submission never blocks and fails fast when full
//! - **Concurrency slots**: simultaneous executions bounded by the worker count
//! - **Global pacing**: one shared token bucket spaces job starts across all workers
//! - **Result handles**: every submission returns a future resolving exactly once
//! - **Live statistics**: processed/failed/queued counters and a status endpoint
//! - **Graceful shutdown**: in-hand jobs finish, bounded by a timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DispatchPool                           │
//! │  submit() ──► JobQueue (bounded FIFO) ──► Worker × N         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Worker: ConcurrencySlots ─► RateLimiter ─► job body         │
//! │          (bounds concurrency)  (bounds throughput)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            StatsRegistry ─► JobHandle (result)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use everruns_dispatch::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pool = Arc::new(DispatchPool::new(DispatcherConfig::from_env())?);
//!
//! match pool.submit(Job::anonymous("user-1", 3u64, |n| async move { Ok(n * 2) })) {
//!     Ok(handle) => println!("result: {}", handle.await?),
//!     Err(SubmitError::QueueFull { .. }) => println!("busy, try again later"),
//!     Err(e) => return Err(e.into()),
//! }
//!
//! pool.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod limiter;
pub mod owner_quota;
pub mod pool;
pub mod queue;
pub mod slots;
pub mod stats;
pub mod status;
mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::DispatcherConfig;
    pub use crate::error::{JobError, ShutdownError, SubmitError};
    pub use crate::job::{Job, JobHandle, JobResult};
    pub use crate::owner_quota::OwnerQuotaConfig;
    pub use crate::pool::{DispatchPool, PoolState};
    pub use crate::stats::Stats;
    pub use crate::status::PoolStatus;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use config::DispatcherConfig;
pub use error::{ConfigError, JobError, ShutdownError, SubmitError};
pub use job::{Job, JobHandle, JobResult};
pub use limiter::RateLimiter;
pub use owner_quota::{OwnerQuota, OwnerQuotaConfig};
pub use pool::{DispatchPool, PoolState};
pub use slots::ConcurrencySlots;
pub use stats::{Stats, StatsRegistry};
pub use status::{HealthResponse, PoolStatus};
pub use tokio_util::sync::CancellationToken;

// Dispatch load driver
//
// Starts a dispatch pool, serves its status endpoint, pushes synthetic load
// through it and shuts it down gracefully.
//
// Design Decision: Pool settings come from DISPATCH_* env vars (and .env);
// flags override them.

mod load;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use everruns_dispatch::{status, CancellationToken, DispatchPool, DispatcherConfig};

use crate::load::LoadPlan;
use crate::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "dispatch-load")]
#[command(about = "Drive synthetic load through a rate-limited job dispatcher")]
#[command(version)]
pub struct Cli {
    /// Worker count (overrides DISPATCH_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Queue capacity (overrides DISPATCH_QUEUE_CAPACITY)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// External quota in requests per minute; 0 disables pacing
    /// (overrides DISPATCH_REQUESTS_PER_MINUTE)
    #[arg(long)]
    pub rpm: Option<u32>,

    /// Graceful shutdown timeout in seconds (overrides DISPATCH_SHUTDOWN_TIMEOUT_SECS)
    #[arg(long)]
    pub shutdown_timeout_secs: Option<u64>,

    /// Number of jobs to submit
    #[arg(long, default_value = "20")]
    pub jobs: usize,

    /// Simulated latency of each job in milliseconds
    #[arg(long, default_value = "500")]
    pub job_duration_ms: u64,

    /// Probability that a job fails, between 0 and 1
    #[arg(long, default_value = "0.1", value_parser = parse_probability)]
    pub failure_rate: f64,

    /// Number of distinct owners jobs are spread across
    #[arg(long, default_value = "3")]
    pub owners: usize,

    /// Address for the status server
    #[arg(long, env = "DISPATCH_STATUS_ADDR", default_value = "127.0.0.1:9300")]
    pub status_addr: SocketAddr,
}

impl Cli {
    /// Apply flag overrides on top of the environment configuration
    fn dispatcher_config(&self, base: DispatcherConfig) -> DispatcherConfig {
        let mut config = base;
        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(rpm) = self.rpm {
            config = config.with_requests_per_minute(rpm);
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            config = config.with_shutdown_timeout(Duration::from_secs(secs));
        }
        config
    }

    fn load_plan(&self) -> LoadPlan {
        LoadPlan {
            jobs: self.jobs,
            job_duration: Duration::from_millis(self.job_duration_ms),
            failure_rate: self.failure_rate,
            owners: self.owners,
        }
    }
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0 and 1"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    init_telemetry(&TelemetryConfig::from_env());

    let cli = Cli::parse();
    let config = cli.dispatcher_config(DispatcherConfig::from_env());

    let pool = Arc::new(DispatchPool::new(config).context("Invalid dispatcher configuration")?);

    let server_shutdown = CancellationToken::new();
    let server = {
        let listener = tokio::net::TcpListener::bind(cli.status_addr)
            .await
            .context("Failed to bind status address")?;
        tracing::info!("Status server listening on {}", cli.status_addr);

        let app = status::router(Arc::clone(&pool));
        let token = server_shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        })
    };

    let plan = cli.load_plan();
    let stop = CancellationToken::new();
    let load = load::run(&pool, &plan, stop.clone());
    tokio::pin!(load);

    let report = tokio::select! {
        report = &mut load => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            stop.cancel();
            load.await
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    let shutdown = pool.shutdown_with_default_timeout().await;

    server_shutdown.cancel();
    match server.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Status server error"),
        Err(e) => tracing::warn!(error = %e, "Status server task failed"),
        Ok(Ok(())) => {}
    }

    println!("{}", serde_json::to_string_pretty(&pool.stats())?);

    match shutdown {
        Ok(()) => {
            tracing::info!("Dispatcher shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Dispatcher did not drain in time");
            Err(e.into())
        }
    }
}

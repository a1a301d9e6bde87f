// Tracing setup for the load driver
//
// Filter comes from RUST_LOG, then LOG_LEVEL, then the crate defaults.
// LOG_FORMAT=json switches the fmt layer to JSON lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "everruns_dispatch=info,dispatch_load=info";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_filter: Option<String>,
    pub format: LogFormat,
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "text" (default) or "json"
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            format: std::env::var("LOG_FORMAT")
                .map(|f| LogFormat::from_str(&f))
                .unwrap_or(LogFormat::Text),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber
pub fn init_telemetry(config: &TelemetryConfig) {
    let layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(config.filter())
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).init();
}

//! Status reporting
//!
//! Serializable pool snapshot plus an axum router exposing it:
//! - `GET /status` - [`PoolStatus`] as JSON
//! - `GET /health` - 200 while running, 503 once shutdown has begun

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pool::{DispatchPool, PoolState};
use crate::stats::Stats;

/// Point-in-time view of a dispatch pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub worker_count: usize,
    /// Workers currently holding a concurrency slot
    pub busy_workers: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub queue_full: bool,
    pub min_interval_ms: u64,
    pub average_processing_time_ms: u64,
    pub stats: Stats,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Health endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the status router for a pool
pub fn router(pool: Arc<DispatchPool>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(pool)
}

async fn status(State(pool): State<Arc<DispatchPool>>) -> Json<PoolStatus> {
    Json(pool.status())
}

async fn health(State(pool): State<Arc<DispatchPool>>) -> (StatusCode, Json<HealthResponse>) {
    let state = pool.state();
    let code = match state {
        PoolState::Running => StatusCode::OK,
        PoolState::Draining | PoolState::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    let status = match state {
        PoolState::Running => "ok".to_string(),
        other => other.to_string(),
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::DispatcherConfig;

    fn test_pool() -> Arc<DispatchPool> {
        Arc::new(
            DispatchPool::new(
                DispatcherConfig::new()
                    .with_worker_count(2)
                    .with_queue_capacity(10)
                    .with_requests_per_minute(60),
            )
            .unwrap(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let pool = test_pool();
        let (code, body) = get_json(router(Arc::clone(&pool)), "/status").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "running");
        assert_eq!(body["worker_count"], 2);
        assert_eq!(body["queue_capacity"], 10);
        assert_eq!(body["queue_full"], false);
        assert_eq!(body["min_interval_ms"], 1000);
        assert_eq!(body["stats"]["total_processed"], 0);

        let parsed: PoolStatus = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.queue_size, 0);

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_reflects_shutdown() {
        let pool = test_pool();

        let (code, body) = get_json(router(Arc::clone(&pool)), "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        let (code, body) = get_json(router(Arc::clone(&pool)), "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_health_reports_draining_while_job_in_flight() {
        let pool = test_pool();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = pool
            .submit(crate::Job::new("long", "owner", (), move |_| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            }))
            .unwrap();
        started_rx.await.unwrap();

        assert!(pool.shutdown(Duration::ZERO).await.is_err());

        let (code, body) = get_json(router(Arc::clone(&pool)), "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");

        let (code, body) = get_json(router(Arc::clone(&pool)), "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "draining");
        assert_eq!(body["busy_workers"], 1);

        release_tx.send(()).unwrap();
        handle.await.unwrap();
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = router(test_pool())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// SPDX-License-Identifier: Apache-2.0
//! HTTP server for health checks and Prometheus metrics.

use crate::metrics::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Agent readiness shared between the HTTP server and the controller.
#[derive(Clone)]
pub struct HealthState {
    /// Set once the first discovery pass succeeded.
    ready: Arc<AtomicBool>,
    /// Set once shutdown was requested.
    stopping: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Liveness probe - returns 200 while the process runs.
async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(HealthResponse { status: "healthy" }),
    )
}

/// Readiness probe - returns 200 after the first discovery pass, 503 otherwise.
async fn ready_handler(State(state): State<HealthState>) -> Response {
    let (code, status) = if state.is_stopping() {
        (StatusCode::SERVICE_UNAVAILABLE, "stopping")
    } else if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };
    (code, axum::Json(HealthResponse { status })).into_response()
}

/// Prometheus metrics endpoint.
async fn metrics_handler() -> impl IntoResponse {
    let body = metrics().encode();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Build the HTTP router with all endpoints.
fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve health checks and metrics until `cancel` fires.
pub async fn serve_http(
    addr: SocketAddr,
    state: HealthState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening for health checks and metrics");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        error!(error = %e, "HTTP server error");
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_body(state: HealthState, uri: &str) -> (StatusCode, String) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body_bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get_body(HealthState::new(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }

    #[tokio::test]
    async fn test_ready_endpoint_starting() {
        let (status, body) = get_body(HealthState::new(), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("starting"));
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let state = HealthState::new();
        state.set_ready(true);

        let (status, body) = get_body(state, "/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ready"));
    }

    #[tokio::test]
    async fn test_ready_endpoint_stopping() {
        let state = HealthState::new();
        state.set_ready(true);
        state.set_stopping();

        let (status, body) = get_body(state, "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("stopping"));
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let response = build_router(HealthState::new())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[test]
    fn test_health_state_clone_shares_state() {
        let state1 = HealthState::new();
        let state2 = state1.clone();

        state1.set_ready(true);
        assert!(state2.is_ready());
        assert!(!state2.is_stopping());
    }
}

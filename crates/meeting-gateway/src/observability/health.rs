//! Health endpoints for the Meeting Gateway.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the signaling listener bound?)
//! - `GET /metrics` - Prometheus text format, when a recorder handle is given
//!
//! # Health State
//!
//! The `HealthState` tracks:
//! - `live`: Always true after startup (process is running)
//! - `ready`: True once the signaling listener is bound, false again while draining

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness of the gateway process.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints, plus
/// `/metrics` if a Prometheus handle is supplied.
pub fn health_router(health_state: Arc<HealthState>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state);

    match metrics {
        Some(handle) => router.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(handle),
        ),
        None => router,
    }
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[tracing::instrument(skip_all, name = "mg.metrics.scrape")]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let app = health_router(Arc::new(HealthState::new()), None);
        assert_eq!(get_status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_endpoint_follows_state() {
        let state = Arc::new(HealthState::new());

        let app = health_router(Arc::clone(&state), None);
        assert_eq!(
            get_status(app, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        let app = health_router(Arc::clone(&state), None);
        assert_eq!(get_status(app, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_absent_without_handle() {
        let app = health_router(Arc::new(HealthState::new()), None);
        assert_eq!(get_status(app, "/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_prometheus_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("mg_admissions_total", "outcome" => "pending").increment(1);
        });

        let app = health_router(Arc::new(HealthState::new()), Some(handle));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("mg_admissions_total"));
    }
}

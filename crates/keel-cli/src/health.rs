//! Health check endpoints.
//!
//! `/healthz` is the liveness probe, `/readyz` the readiness probe. Both
//! answer 200 or 503 with the probe report as JSON.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use keel_core::app::{HealthProbe, HealthReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    /// "ok" or "unavailable".
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    report: HealthReport,
}

pub fn routes(probe: HealthProbe) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(probe)
}

async fn healthz(State(probe): State<HealthProbe>) -> impl IntoResponse {
    respond(probe.is_alive(), probe.report())
}

async fn readyz(State(probe): State<HealthProbe>) -> impl IntoResponse {
    respond(probe.is_ready(), probe.report())
}

fn respond(ok: bool, report: HealthReport) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            report,
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use keel_core::app::{LeaderGate, LifecycleContext, WorkerLiveness};
    use keel_core::domain::{HolderIdentity, LoopState};
    use tower::ServiceExt;

    use super::*;

    fn probe(connected: bool) -> (HealthProbe, Arc<LifecycleContext>) {
        let context = Arc::new(LifecycleContext::new());
        let probe = HealthProbe::new(
            context.clone(),
            Arc::new(LeaderGate::standalone(HolderIdentity::new("solo"))),
            Arc::new(WorkerLiveness::default()),
            Arc::new(AtomicBool::new(connected)),
            0,
        );
        (probe, context)
    }

    async fn get(router: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn readyz_reflects_probe() {
        let (probe, context) = probe(true);
        let router = routes(probe);

        let (status, body) = get(router.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");

        context.transition(LoopState::Starting).unwrap();
        context.transition(LoopState::Running).unwrap();
        let (status, body) = get(router, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leadership"], "standalone");
        assert_eq!(body["loop_state"], "Running");
    }

    #[tokio::test]
    async fn healthz_fails_once_stopped() {
        let (probe, context) = probe(false);
        let router = routes(probe);

        let (status, _) = get(router.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);

        context.transition(LoopState::Stopped).unwrap();
        let (status, body) = get(router, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["alive"], false);
    }
}

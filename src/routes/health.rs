// src/routes/health.rs
//! API health check endpoint for the telemetry backend.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) and the dashboard to verify that the service is
//! running and that the row store answers. It is a sibling module in the
//! `routes` directory and follows the Explicit Module Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::AppState;
use crate::probe::HealthReport;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    success: bool,
    #[serde(flatten)]
    report: HealthReport,
}

/// Handle `GET /health`.
///
/// Runs the health probe (one bounded read, no writes) and answers 200 when
/// healthy, 503 when degraded. The body always carries the probe's own
/// response time.
async fn health(State(state): State<AppState>) -> Response {
    // ---
    let report = state.health.check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        success: report.is_healthy(),
        report,
    };
    (status, Json(body)).into_response()
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

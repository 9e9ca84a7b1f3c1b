//! Anomaly endpoints: report, list, severity summary and acknowledge.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, patch},
    Json, Router,
};
use uuid::Uuid;

use super::{respond, respond_list, AppState};
use crate::models::RawAnomaly;
use crate::query::AnomalyQuery;
use crate::ApiError;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/anomaly", get(list).post(create))
        .route("/anomaly/summary", get(summary))
        .route("/anomaly/{id}/acknowledge", patch(acknowledge))
}

/// `POST /anomaly`
async fn create(
    State(state): State<AppState>,
    payload: Result<Json<RawAnomaly>, JsonRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Json(raw) = payload?;
    let row = state.ingest.record_anomaly(raw).await?;
    Ok(respond(StatusCode::CREATED, row))
}

/// `GET /anomaly`
async fn list(
    State(state): State<AppState>,
    params: Result<Query<AnomalyQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Query(q) = params?;
    let rows = state.query.list_anomalies(q).await?;
    Ok(respond_list(rows))
}

/// `GET /anomaly/summary`
async fn summary(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summary = state.query.anomaly_summary().await?;
    Ok(respond(StatusCode::OK, summary))
}

/// `PATCH /anomaly/{id}/acknowledge`
async fn acknowledge(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Path(id) = id?;
    let row = state.ingest.acknowledge_anomaly(id).await?;
    tracing::info!("Anomaly {} acknowledged", row.id);
    Ok(respond(StatusCode::OK, row))
}

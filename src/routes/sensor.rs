//! Sensor reading endpoints: single and batch ingest, filtered list and
//! latest-per-category.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::{respond, respond_list, AppState};
use crate::models::{RawSensorBatch, RawSensorReading};
use crate::query::ReadingQuery;
use crate::{ApiError, ValidationError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensor", get(list).post(create))
        .route("/sensor/batch", post(create_batch))
        .route("/sensor/latest", get(latest))
}

#[derive(Serialize)]
struct BatchResponse {
    success: bool,
    inserted: usize,
}

/// `POST /sensor`
async fn create(
    State(state): State<AppState>,
    payload: Result<Json<RawSensorReading>, JsonRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Json(raw) = payload?;
    let row = state.ingest.record_reading(raw).await?;
    Ok(respond(StatusCode::CREATED, row))
}

/// `POST /sensor/batch`
async fn create_batch(
    State(state): State<AppState>,
    payload: Result<Json<RawSensorBatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Json(batch) = payload?;
    let readings = batch
        .readings
        .ok_or_else(|| ValidationError::new("readings", "readings must be a non-empty array"))?;

    let inserted = state.ingest.record_batch(readings).await?;
    let body = BatchResponse {
        success: true,
        inserted,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// `GET /sensor`
async fn list(
    State(state): State<AppState>,
    params: Result<Query<ReadingQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Query(q) = params?;
    tracing::debug!("Listing readings: {:?}", q);
    let rows = state.query.list_readings(q).await?;
    Ok(respond_list(rows))
}

/// `GET /sensor/latest`
async fn latest(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.query.latest_readings().await)
}

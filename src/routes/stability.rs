//! Stability score endpoints: score write, latest-per-category, chronological
//! history and drift events.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use super::{respond, respond_list, AppState};
use crate::models::RawStabilityScore;
use crate::query::{DriftQuery, HistoryQuery};
use crate::ApiError;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/stability", post(create))
        .route("/stability/latest", get(latest))
        .route("/stability/history", get(history))
        .route("/stability/drift", get(drift))
}

/// `POST /stability`
async fn create(
    State(state): State<AppState>,
    payload: Result<Json<RawStabilityScore>, JsonRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Json(raw) = payload?;
    let row = state.ingest.record_stability(raw).await?;
    Ok(respond(StatusCode::CREATED, row))
}

/// `GET /stability/latest`
async fn latest(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.query.latest_stability().await)
}

/// `GET /stability/history`
async fn history(
    State(state): State<AppState>,
    params: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Query(q) = params?;
    let rows = state.query.stability_history(q).await?;
    Ok(respond_list(rows))
}

/// `GET /stability/drift`
async fn drift(
    State(state): State<AppState>,
    params: Result<Query<DriftQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    // ---
    let Query(q) = params?;
    let rows = state.query.drift_events(q).await?;
    Ok(respond_list(rows))
}

//! HTTP routing gateway (EMBP).
//!
//! Builds the services around an injected `RowStore`, mounts every resource
//! subrouter under `/api`, and wraps the whole tree in the logging, CORS and
//! preflight layers. `main.rs` only sees [`router`].

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, OriginalUri},
    http::{Method, StatusCode},
    middleware::from_fn,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;

use crate::ingest::IngestionService;
use crate::probe::HealthProbe;
use crate::query::QueryService;
use crate::store::RowStore;
use crate::{ApiError, Config};

mod anomaly;
mod health;
mod layers;
mod sensor;
mod stability;

// ---

/// Shared handler state. Every field is a cheap clone over the same store.
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestionService,
    pub query: QueryService,
    pub health: HealthProbe,
}

pub fn router(store: Arc<dyn RowStore>, config: &Config) -> Router {
    // ---
    let state = AppState {
        ingest: IngestionService::new(store.clone()),
        query: QueryService::new(store.clone()),
        health: HealthProbe::new(store, config.health_degraded_after),
    };

    let api = Router::new()
        .merge(sensor::router())
        .merge(anomaly::router())
        .merge(stability::router())
        .merge(health::router())
        .method_not_allowed_fallback(unsupported_method);

    Router::new()
        .nest("/api", api)
        .fallback(route_not_found)
        .layer(from_fn(layers::answer_preflight))
        .layer(layers::cors(config))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(from_fn(layers::log_requests))
        .with_state(state)
}

#[derive(Serialize)]
struct DataResponse<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ListResponse<T> {
    success: bool,
    count: usize,
    data: Vec<T>,
}

/// `{success: true, data}` with the given status.
fn respond<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(DataResponse {
            success: true,
            data,
        }),
    )
        .into_response()
}

/// `{success: true, count, data: [...]}` with status 200.
fn respond_list<T: Serialize>(rows: Vec<T>) -> Response {
    let body = ListResponse {
        success: true,
        count: rows.len(),
        data: rows,
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn route_not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("Route {} {} not found", method, uri.path()))
}

async fn unsupported_method(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::UnsupportedMethod {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

//! Cross-cutting HTTP middleware: request logging, CORS and preflight.
//!
//! Like every sibling in `routes/`, this module exports only to the gateway
//! (`mod.rs`), which stacks these layers around the API router.

use std::time::Instant;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::Config;

// ---

/// Log status, method, path and latency of every request.
///
/// Level follows the status class: `error` for 5xx, `warn` for 4xx, `info`
/// otherwise.
pub async fn log_requests(req: Request, next: Next) -> Response {
    // ---
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let ms = start.elapsed().as_millis();
    if status.is_server_error() {
        error!("{} {} {} - {}ms", status.as_u16(), method, path, ms);
    } else if status.is_client_error() {
        warn!("{} {} {} - {}ms", status.as_u16(), method, path, ms);
    } else {
        info!("{} {} {} - {}ms", status.as_u16(), method, path, ms);
    }
    response
}

/// Answer any `OPTIONS` request with an empty success, whatever the path.
///
/// Browser preflights carrying CORS headers are already answered by the
/// outer `CorsLayer`; this covers bare `OPTIONS` probes.
pub async fn answer_preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

/// CORS policy: any origin unless `CORS_ORIGIN` names a single one.
pub fn cors(config: &Config) -> CorsLayer {
    // ---
    let origin = match config.cors_origin.as_deref() {
        None => AllowOrigin::any(),
        Some(o) => match HeaderValue::from_str(o) {
            Ok(v) => AllowOrigin::exact(v),
            Err(e) => {
                warn!("Ignoring unusable CORS_ORIGIN '{}': {}, allowing any origin", o, e);
                AllowOrigin::any()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

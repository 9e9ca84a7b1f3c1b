//! Error taxonomy for the telemetry service.
//!
//! `ApiError` is what handlers return; its `IntoResponse` impl renders the
//! JSON failure envelope (`{success: false, error, code?}`) and picks the
//! status code. Lower layers produce `ValidationError` (validator) and
//! `StoreError` (row store gateway), both of which convert into `ApiError`.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

// ---

/// Malformed, missing or out-of-range input. Always HTTP 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Name of the offending field (e.g. `score`, `readings[3].unit`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field is required but absent or `null`.
    pub fn missing(field: &str) -> Self {
        Self::new(field, format!("{field} is required"))
    }

    /// Rescope an element-level error to its position in a batch.
    pub fn in_batch(self, index: usize) -> Self {
        Self {
            field: format!("readings[{index}].{}", self.field),
            message: format!("readings[{index}]: {}", self.message),
        }
    }
}

/// Failure reported by, or while talking to, the row store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    /// Structured error code from the datastore (e.g. a SQLSTATE), if any.
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // ---
        match &err {
            sqlx::Error::Database(db) => Self {
                message: db.message().to_string(),
                code: db.code().map(|c| c.into_owned()),
            },
            _ => Self::new(err.to_string()),
        }
    }
}

/// Everything a request handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Method {method} not allowed on {path}")]
    UnsupportedMethod { method: String, path: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        // ---
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(e) if e.code.is_some() => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnsupportedMethod { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

/// JSON body for every failure response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        match &self {
            Self::Validation(v) => {
                tracing::debug!("Validation failed on '{}': {}", v.field, v.message)
            }
            _ if status.is_server_error() => tracing::error!("{}", self),
            _ => tracing::debug!("Request rejected ({}): {}", status.as_u16(), self),
        }

        let code = match &self {
            Self::Store(e) => e.code.as_deref(),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(ValidationError::new("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(ValidationError::new("query", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(ValidationError::new("id", rejection.body_text()))
    }
}

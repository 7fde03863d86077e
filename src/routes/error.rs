use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::services::results::QueryError;
use crate::services::submission::SubmitError;

const INTERNAL_MESSAGE: &str = "Unexpected server error occurred";

/// Error returned by HTTP handlers, rendered as `{"errorMessage": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "job not found".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string()),
        };
        (status, Json(json!({ "errorMessage": message }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            tracing::error!(error = %e, "Job submission failed");
            ApiError::Internal
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound
        } else {
            tracing::error!(error = %e, "Job status lookup failed");
            ApiError::Internal
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        tracing::debug!(error = %e, "Rejected request credentials");
        ApiError::Unauthorized
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::BadRequest(report.to_string())
    }
}

pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Job submission, polling and health routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/face-match-async", post(jobs::submit_face_match))
        .route("/api/v1/ocr-async", post(jobs::submit_ocr))
        .route("/api/v1/result/{job_type}/{job_id}", get(jobs::get_result))
        .with_state(state)
}

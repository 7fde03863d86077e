use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use std::str::FromStr;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthenticatedClient;
use crate::models::api::{FaceMatchRequest, JobStatusResponse, OcrRequest, SubmitResponse};
use crate::models::job::JobType;
use crate::routes::error::ApiError;

fn parse_body<T: Validate<Context = ()>>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;
    Ok(request)
}

/// POST /api/v1/face-match-async: queue a comparison of two face images.
pub async fn submit_face_match(
    State(state): State<AppState>,
    AuthenticatedClient(client_id): AuthenticatedClient,
    body: Result<Json<FaceMatchRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let request = parse_body(body)?;
    let id = state
        .submissions
        .submit(JobType::FaceMatch, client_id, &[request.image1, request.image2])
        .await?;
    Ok(Json(SubmitResponse { id }))
}

/// POST /api/v1/ocr-async: queue field extraction from an id card image.
pub async fn submit_ocr(
    State(state): State<AppState>,
    AuthenticatedClient(client_id): AuthenticatedClient,
    body: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let request = parse_body(body)?;
    let id = state
        .submissions
        .submit(JobType::Ocr, client_id, &[request.image])
        .await?;
    Ok(Json(SubmitResponse { id }))
}

/// GET /api/v1/result/{job_type}/{job_id}
pub async fn get_result(
    State(state): State<AppState>,
    AuthenticatedClient(client_id): AuthenticatedClient,
    Path((job_type, job_id)): Path<(String, String)>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_type = JobType::from_str(&job_type)
        .map_err(|_| ApiError::BadRequest(format!("unknown job type {job_type:?}")))?;

    let view = state.results.get_status(&job_id, job_type, client_id).await?;
    let job_id = Uuid::parse_str(&job_id).map_err(|_| ApiError::NotFound)?;
    Ok(Json(JobStatusResponse::new(job_id, view)))
}

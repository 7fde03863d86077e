use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobResult;

/// Request to compare two previously uploaded face images.
#[derive(Debug, Deserialize, Validate)]
pub struct FaceMatchRequest {
    #[garde(length(min = 1, max = 128))]
    pub image1: String,

    #[garde(length(min = 1, max = 128))]
    pub image2: String,
}

/// Request to read the fields of a previously uploaded id card.
#[derive(Debug, Deserialize, Validate)]
pub struct OcrRequest {
    #[garde(length(min = 1, max = 128))]
    pub image: String,
}

/// Response after submitting a job. Identical for fresh and deduplicated submissions.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
}

/// Status-shaped view of a job, exposing only the fields relevant to its state.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusView {
    Created {
        created_at: DateTime<Utc>,
    },
    Processing {
        processed_at: DateTime<Utc>,
    },
    Failed {
        failed_at: DateTime<Utc>,
        failed_reason: String,
    },
    Completed {
        completed_at: DateTime<Utc>,
        result: JobResult,
    },
}

impl JobStatusView {
    pub fn message(&self) -> &'static str {
        match self {
            JobStatusView::Created { .. } => "job is created",
            JobStatusView::Processing { .. } => "job is still running",
            JobStatusView::Failed { .. } => "job is failed",
            JobStatusView::Completed { .. } => "job is completed",
        }
    }
}

/// Response for polling a job.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub message: &'static str,
    #[serde(flatten)]
    pub view: JobStatusView,
}

impl JobStatusResponse {
    pub fn new(job_id: Uuid, view: JobStatusView) -> Self {
        Self {
            job_id,
            message: view.message(),
            view,
        }
    }
}

use std::sync::Arc;
use uuid::Uuid;

use crate::db::queries::{JobStore, JobStoreError};
use crate::models::api::JobStatusView;
use crate::models::job::{Job, JobStatus, JobType};

/// Tenant-scoped lookup of job status.
pub struct ResultQueryService {
    jobs: Arc<dyn JobStore>,
}

impl ResultQueryService {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Fetch the status of `job_id` on behalf of `client_id`.
    ///
    /// Jobs owned by another client fail with [`QueryError::AccessDenied`], which
    /// callers must render exactly like [`QueryError::NotFound`].
    pub async fn get_status(
        &self,
        job_id: &str,
        job_type: JobType,
        client_id: i64,
    ) -> Result<JobStatusView, QueryError> {
        let Ok(job_id) = Uuid::parse_str(job_id) else {
            return Err(QueryError::NotFound);
        };

        let job = self
            .jobs
            .get_by_job_id(job_id, job_type)
            .await?
            .ok_or(QueryError::NotFound)?;

        if job.client_id != client_id {
            tracing::warn!(%job_id, client_id, "Client requested a job it does not own");
            return Err(QueryError::AccessDenied);
        }

        status_view(&job)
    }
}

fn status_view(job: &Job) -> Result<JobStatusView, QueryError> {
    let inconsistent = || QueryError::Inconsistent(job.job_id);

    let view = match job.status {
        JobStatus::Created => JobStatusView::Created {
            created_at: job.created_at,
        },
        JobStatus::Processing => JobStatusView::Processing {
            processed_at: job.processed_at.ok_or_else(inconsistent)?,
        },
        JobStatus::Failed => JobStatusView::Failed {
            failed_at: job.failed_at.ok_or_else(inconsistent)?,
            failed_reason: job.failed_reason.clone().unwrap_or_default(),
        },
        JobStatus::Completed => JobStatusView::Completed {
            completed_at: job.completed_at.ok_or_else(inconsistent)?,
            result: job
                .result
                .clone()
                .filter(|result| result.job_type() == job.job_type)
                .ok_or_else(inconsistent)?,
        },
    };
    Ok(view)
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("job not found")]
    NotFound,

    #[error("job belongs to another client")]
    AccessDenied,

    #[error("job {0} is missing fields for its status")]
    Inconsistent(Uuid),

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

impl QueryError {
    /// Errors that must be indistinguishable from a missing job.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound | QueryError::AccessDenied)
    }
}

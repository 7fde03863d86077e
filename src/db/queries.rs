use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{Job, JobResult, JobStatus, JobType, NewJob, OcrDetails};

/// Outcome of inserting a job keyed by its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A job with the same fingerprint already exists.
    Existing(Uuid),
}

/// Outcome of a guarded status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job was not in a state the transition may leave from.
    /// Carries the current status, or `None` when the job does not exist.
    Skipped(Option<JobStatus>),
}

/// Durable job records with monotonic status transitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &NewJob) -> Result<CreateOutcome, JobStoreError>;

    /// Fail a job that never reached the queue and release its fingerprint, so a retry
    /// creates a fresh job while ids already handed out still resolve.
    async fn abandon_unqueued_job(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError>;

    async fn transition_to_processing(&self, job_id: Uuid) -> Result<Transition, JobStoreError>;

    async fn transition_to_completed(
        &self,
        job_id: Uuid,
        result: &JobResult,
    ) -> Result<Transition, JobStoreError>;

    async fn transition_to_failed(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<Transition, JobStoreError>;

    async fn get_by_job_id(
        &self,
        job_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Check database connectivity.
    async fn health_check(&self) -> Result<(), JobStoreError>;
}

/// PostgreSQL job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, JobStoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| parse_status(&r.try_get::<String, _>("status")?))
            .transpose()
    }

    async fn guarded(
        &self,
        job_id: Uuid,
        applied: Option<PgRow>,
    ) -> Result<Transition, JobStoreError> {
        match applied {
            Some(_) => Ok(Transition::Applied),
            None => Ok(Transition::Skipped(self.current_status(job_id).await?)),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &NewJob) -> Result<CreateOutcome, JobStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, job_type, client_id, input_image_ids, fingerprint, status)
            VALUES ($1, $2, $3, $4, $5, 'created')
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING job_id
            "#,
        )
        .bind(job.job_id)
        .bind(job.job_type.to_string())
        .bind(job.client_id)
        .bind(&job.input_image_ids)
        .bind(&job.fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(CreateOutcome::Created);
        }

        let existing = sqlx::query("SELECT job_id FROM jobs WHERE fingerprint = $1")
            .bind(&job.fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(row) => Ok(CreateOutcome::Existing(row.try_get("job_id")?)),
            None => Err(JobStoreError::Conflict(job.fingerprint.clone())),
        }
    }

    async fn abandon_unqueued_job(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', failed_at = NOW(), failed_reason = $2, fingerprint = NULL
            WHERE job_id = $1 AND status = 'created'
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_to_processing(&self, job_id: Uuid) -> Result<Transition, JobStoreError> {
        // Re-entering `processing` is allowed so a redelivered message can run again.
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', processed_at = NOW()
            WHERE job_id = $1 AND status IN ('created', 'processing')
            RETURNING job_id
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        self.guarded(job_id, row).await
    }

    async fn transition_to_completed(
        &self,
        job_id: Uuid,
        result: &JobResult,
    ) -> Result<Transition, JobStoreError> {
        let (match_score, ocr_details) = match result {
            JobResult::FaceMatch(score) => (Some(*score), None),
            JobResult::Ocr(details) => (None, Some(serde_json::to_value(details)?)),
        };

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = NOW(),
                match_score = $2,
                ocr_details = $3
            WHERE job_id = $1 AND status = 'processing'
            RETURNING job_id
            "#,
        )
        .bind(job_id)
        .bind(match_score)
        .bind(ocr_details)
        .fetch_optional(&self.pool)
        .await?;

        self.guarded(job_id, row).await
    }

    async fn transition_to_failed(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<Transition, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', failed_at = NOW(), failed_reason = $2
            WHERE job_id = $1 AND status IN ('created', 'processing')
            RETURNING job_id
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        self.guarded(job_id, row).await
    }

    async fn get_by_job_id(
        &self,
        job_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, job_type, client_id, input_image_ids, status, created_at,
                   processed_at, completed_at, failed_at, failed_reason,
                   match_score, ocr_details
            FROM jobs
            WHERE job_id = $1 AND job_type = $2
            "#,
        )
        .bind(job_id)
        .bind(job_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| job_from_row(&r, job_type)).transpose()
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_status(value: &str) -> Result<JobStatus, JobStoreError> {
    JobStatus::from_str(value).map_err(|_| JobStoreError::Decode(format!("unknown job status '{value}'")))
}

/// Decode a row into the record shape of `job_type`.
fn job_from_row(r: &PgRow, job_type: JobType) -> Result<Job, JobStoreError> {
    let status = parse_status(&r.try_get::<String, _>("status")?)?;

    let result = match (status, job_type) {
        (JobStatus::Completed, JobType::FaceMatch) => {
            let score: Option<i32> = r.try_get("match_score")?;
            score.map(JobResult::FaceMatch)
        }
        (JobStatus::Completed, JobType::Ocr) => {
            let details: Option<serde_json::Value> = r.try_get("ocr_details")?;
            details
                .map(serde_json::from_value::<OcrDetails>)
                .transpose()?
                .map(JobResult::Ocr)
        }
        _ => None,
    };

    Ok(Job {
        job_id: r.try_get("job_id")?,
        job_type,
        client_id: r.try_get("client_id")?,
        input_image_ids: r.try_get("input_image_ids")?,
        status,
        created_at: r.try_get("created_at")?,
        processed_at: r.try_get("processed_at")?,
        completed_at: r.try_get("completed_at")?,
        failed_at: r.try_get("failed_at")?,
        failed_reason: r.try_get("failed_reason")?,
        result,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to decode stored job: {0}")]
    Decode(String),

    #[error("Result serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Fingerprint {0} conflicted but no job holds it")]
    Conflict(String),
}

use std::sync::Arc;
use uuid::Uuid;

use crate::db::image_queries::ImageStore;
use crate::db::queries::{CreateOutcome, JobStore, JobStoreError};
use crate::models::image::{ImageKind, UploadedImage};
use crate::models::job::{JobStatus, JobType, NewJob};
use crate::services::cache::{CacheLookup, Fingerprint, IdempotencyCache};
use crate::services::queue::{QueueError, TaskMessage, TaskQueue};

const UNQUEUED_REASON: &str = "job could not be queued";

/// Accepts face-match and OCR requests, deduplicates them, and enqueues new work.
pub struct SubmissionService {
    images: Arc<dyn ImageStore>,
    jobs: Arc<dyn JobStore>,
    cache: Arc<dyn IdempotencyCache>,
    queue: Arc<dyn TaskQueue>,
}

impl SubmissionService {
    pub fn new(
        images: Arc<dyn ImageStore>,
        jobs: Arc<dyn JobStore>,
        cache: Arc<dyn IdempotencyCache>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            images,
            jobs,
            cache,
            queue,
        }
    }

    /// Submit a job for `client_id` over previously uploaded images.
    ///
    /// Returns the job id. Resubmitting the same job type and image set (in any
    /// order) returns the id of the existing job instead of creating a new one.
    pub async fn submit(
        &self,
        job_type: JobType,
        client_id: i64,
        image_refs: &[String],
    ) -> Result<Uuid, SubmitError> {
        let images = self.validate(job_type, client_id, image_refs).await?;

        let fingerprint = Fingerprint::compute(job_type, client_id, image_refs);
        if let CacheLookup::Hit(job_id) = self.cache.get(&fingerprint).await {
            metrics::counter!("kyc_jobs_deduplicated_total", "job_type" => job_type.to_string())
                .increment(1);
            tracing::info!(%job_id, %job_type, client_id, "Returning cached job for duplicate submission");
            return Ok(job_id);
        }

        let job_id = Uuid::new_v4();
        let message = TaskMessage::new(job_type, job_id, image_refs).ok_or(
            SubmitError::ImageCountMismatch {
                job_type,
                expected: job_type.image_count(),
                actual: image_refs.len(),
            },
        )?;

        let new_job = NewJob {
            job_id,
            job_type,
            client_id,
            input_image_ids: images.iter().map(|image| image.id).collect(),
            fingerprint: fingerprint.to_string(),
        };

        if let CreateOutcome::Existing(existing) = self.jobs.create_job(&new_job).await? {
            metrics::counter!("kyc_jobs_deduplicated_total", "job_type" => job_type.to_string())
                .increment(1);
            tracing::info!(job_id = %existing, %job_type, client_id, "Submission matched an existing job");
            // A `created` job may still be abandoned by the submission that owns it.
            if self.has_started(existing, job_type).await {
                self.cache.set(&fingerprint, existing);
            }
            return Ok(existing);
        }

        if let Err(e) = self.publish(&message).await {
            tracing::error!(%job_id, %job_type, error = %e, "Failed to enqueue job, abandoning it");
            if let Err(abandon) = self.jobs.abandon_unqueued_job(job_id, UNQUEUED_REASON).await {
                tracing::error!(%job_id, error = %abandon, "Failed to abandon unqueued job");
            }
            return Err(e.into());
        }

        self.cache.set(&fingerprint, job_id);

        metrics::counter!("kyc_jobs_submitted_total", "job_type" => job_type.to_string()).increment(1);
        tracing::info!(%job_id, %job_type, client_id, "Job created and enqueued");

        Ok(job_id)
    }

    /// Check references, then ownership, then image kinds.
    async fn validate(
        &self,
        job_type: JobType,
        client_id: i64,
        image_refs: &[String],
    ) -> Result<Vec<UploadedImage>, SubmitError> {
        if image_refs.len() != job_type.image_count() {
            return Err(SubmitError::ImageCountMismatch {
                job_type,
                expected: job_type.image_count(),
                actual: image_refs.len(),
            });
        }

        let mut images = Vec::with_capacity(image_refs.len());
        for reference in image_refs {
            match self.images.get_by_reference(reference).await? {
                Some(image) => images.push(image),
                None => return Err(SubmitError::InvalidImageReference(reference.clone())),
            }
        }

        // Every image owned by the caller also means a pair shares one owner.
        if images.iter().any(|image| image.client_id != client_id) {
            return Err(SubmitError::ImageOwnershipMismatch);
        }

        let expected = job_type.expected_image_kind();
        if let Some(image) = images.iter().find(|image| image.kind != expected) {
            return Err(SubmitError::WrongImageType {
                expected,
                reference: image.reference.clone(),
            });
        }

        Ok(images)
    }

    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        self.queue.publish(&message.to_bytes()?).await
    }

    async fn has_started(&self, job_id: Uuid, job_type: JobType) -> bool {
        match self.jobs.get_by_job_id(job_id, job_type).await {
            Ok(Some(job)) => job.status != JobStatus::Created,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "Could not read existing job, not caching it");
                false
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{job_type} expects {expected} image id(s), got {actual}")]
    ImageCountMismatch {
        job_type: JobType,
        expected: usize,
        actual: usize,
    },

    #[error("invalid or missing image id")]
    InvalidImageReference(String),

    #[error("invalid or missing image id")]
    ImageOwnershipMismatch,

    #[error("image {reference} is not a {expected} image")]
    WrongImageType {
        expected: ImageKind,
        reference: String,
    },

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
}

impl SubmitError {
    /// Whether the caller sent a bad request, as opposed to an infrastructure failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SubmitError::Store(_) | SubmitError::Queue(_))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::image::ImageKind;

/// Kind of billable operation a job performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    FaceMatch,
    Ocr,
}

impl JobType {
    /// Number of image references a submission of this type carries.
    pub fn image_count(self) -> usize {
        match self {
            JobType::FaceMatch => 2,
            JobType::Ocr => 1,
        }
    }

    /// Image kind every input of this job type must have.
    pub fn expected_image_kind(self) -> ImageKind {
        match self {
            JobType::FaceMatch => ImageKind::Face,
            JobType::Ocr => ImageKind::IdCard,
        }
    }
}

/// Lifecycle of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Structured fields read from an identity card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrDetails {
    pub name: String,
    pub gender: String,
    #[serde(rename = "dateOfBirth")]
    pub date_of_birth: String,
    #[serde(rename = "idNumber")]
    pub id_number: String,
    #[serde(rename = "addressLine1")]
    pub address_line1: String,
    #[serde(rename = "addressLine2")]
    pub address_line2: String,
    pub pincode: String,
}

/// Outcome of a completed job, shaped by its type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum JobResult {
    /// Face similarity score in `1..=100`.
    FaceMatch(i32),
    Ocr(OcrDetails),
}

impl JobResult {
    pub fn job_type(&self) -> JobType {
        match self {
            JobResult::FaceMatch(_) => JobType::FaceMatch,
            JobResult::Ocr(_) => JobType::Ocr,
        }
    }
}

/// Durable record of an asynchronous job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub client_id: i64,
    pub input_image_ids: Vec<i64>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub result: Option<JobResult>,
}

/// Insert payload for a freshly accepted submission.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub client_id: i64,
    pub input_image_ids: Vec<i64>,
    pub fingerprint: String,
}

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{JobResult, OcrDetails};
use crate::services::queue::TaskMessage;

/// Valid range of a face similarity score.
pub const SCORE_RANGE: std::ops::RangeInclusive<i32> = 1..=100;

/// Compares two face images.
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    async fn face_match(&self, image1: &str, image2: &str) -> Result<i32, ExecutorError>;
}

/// Reads the identity fields printed on an id card.
#[async_trait]
pub trait IdCardReader: Send + Sync {
    async fn read_id_card(&self, image: &str) -> Result<OcrDetails, ExecutorError>;
}

/// Runs the operation a task message asks for.
#[derive(Clone)]
pub struct Executors {
    face_matcher: Arc<dyn FaceMatcher>,
    id_card_reader: Arc<dyn IdCardReader>,
    timeout: Option<Duration>,
}

impl Executors {
    pub fn new(face_matcher: Arc<dyn FaceMatcher>, id_card_reader: Arc<dyn IdCardReader>) -> Self {
        Self {
            face_matcher,
            id_card_reader,
            timeout: None,
        }
    }

    /// Fail any operation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(&self, task: &TaskMessage) -> Result<JobResult, ExecutorError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(task))
                .await
                .map_err(|_| ExecutorError::TimedOut(limit))?,
            None => self.dispatch(task).await,
        }
    }

    async fn dispatch(&self, task: &TaskMessage) -> Result<JobResult, ExecutorError> {
        match task {
            TaskMessage::FaceMatch(t) => {
                let score = self.face_matcher.face_match(&t.image1, &t.image2).await?;
                if !SCORE_RANGE.contains(&score) {
                    return Err(ExecutorError::ScoreOutOfRange(score));
                }
                Ok(JobResult::FaceMatch(score))
            }
            TaskMessage::Ocr(t) => Ok(JobResult::Ocr(self.id_card_reader.read_id_card(&t.image).await?)),
        }
    }
}

/// Stand-in face matcher: sleeps for `latency`, then scores the pair from a digest
/// of the two references. The score does not depend on argument order.
pub struct SimulatedFaceMatcher {
    latency: Duration,
}

impl SimulatedFaceMatcher {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl FaceMatcher for SimulatedFaceMatcher {
    async fn face_match(&self, image1: &str, image2: &str) -> Result<i32, ExecutorError> {
        tokio::time::sleep(self.latency).await;

        let (low, high) = if image1 <= image2 { (image1, image2) } else { (image2, image1) };
        let digest = Sha256::digest(format!("{low}\n{high}").as_bytes());
        let seed = u16::from_be_bytes([digest[0], digest[1]]);
        Ok(i32::from(seed % 100) + 1)
    }
}

/// Stand-in id card reader returning a fixed identity.
pub struct SimulatedIdCardReader {
    latency: Duration,
}

impl SimulatedIdCardReader {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl IdCardReader for SimulatedIdCardReader {
    async fn read_id_card(&self, _image: &str) -> Result<OcrDetails, ExecutorError> {
        tokio::time::sleep(self.latency).await;

        Ok(OcrDetails {
            name: "John Adams".to_string(),
            gender: "Male".to_string(),
            date_of_birth: "1990-01-24".to_string(),
            id_number: "1234-1234-1234".to_string(),
            address_line1: "A2, 201, Amar Villa".to_string(),
            address_line2: "MG Road, Pune".to_string(),
            pincode: "411004".to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("face match score {0} is outside 1..=100")]
    ScoreOutOfRange(i32),

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::{FaceMatchTask, OcrTask};
    use uuid::Uuid;

    struct FixedScore(i32);

    #[async_trait]
    impl FaceMatcher for FixedScore {
        async fn face_match(&self, _: &str, _: &str) -> Result<i32, ExecutorError> {
            Ok(self.0)
        }
    }

    struct Hangs;

    #[async_trait]
    impl IdCardReader for Hangs {
        async fn read_id_card(&self, _: &str) -> Result<OcrDetails, ExecutorError> {
            futures::future::pending().await
        }
    }

    fn face_task() -> TaskMessage {
        TaskMessage::FaceMatch(FaceMatchTask {
            job_id: Uuid::new_v4(),
            image1: "left".to_string(),
            image2: "right".to_string(),
        })
    }

    fn ocr_task() -> TaskMessage {
        TaskMessage::Ocr(OcrTask {
            job_id: Uuid::new_v4(),
            image: "card".to_string(),
        })
    }

    #[tokio::test]
    async fn simulated_score_is_in_range_and_symmetric() {
        let matcher = SimulatedFaceMatcher::new(Duration::ZERO);
        let ab = matcher.face_match("img-a", "img-b").await.unwrap();
        let ba = matcher.face_match("img-b", "img-a").await.unwrap();
        assert_eq!(ab, ba);
        assert!(SCORE_RANGE.contains(&ab));
    }

    #[tokio::test]
    async fn dispatches_by_task_type() {
        let executors = Executors::new(
            Arc::new(FixedScore(42)),
            Arc::new(SimulatedIdCardReader::new(Duration::ZERO)),
        );

        assert_eq!(executors.execute(&face_task()).await.unwrap(), JobResult::FaceMatch(42));
        match executors.execute(&ocr_task()).await.unwrap() {
            JobResult::Ocr(details) => assert_eq!(details.pincode, "411004"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_score_is_an_error() {
        let executors = Executors::new(
            Arc::new(FixedScore(0)),
            Arc::new(SimulatedIdCardReader::new(Duration::ZERO)),
        );
        assert!(matches!(
            executors.execute(&face_task()).await,
            Err(ExecutorError::ScoreOutOfRange(0))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_executor_times_out() {
        let executors = Executors::new(Arc::new(FixedScore(50)), Arc::new(Hangs))
            .with_timeout(Some(Duration::from_secs(30)));
        assert!(matches!(
            executors.execute(&ocr_task()).await,
            Err(ExecutorError::TimedOut(_))
        ));
    }
}

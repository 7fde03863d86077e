use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::queries::{JobStore, Transition};
use crate::services::executor::Executors;
use crate::services::queue::{Delivery, QueueError, TaskMessage, TaskQueue};

/// Back-off after the broker returns an error while waiting for deliveries.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// How a single delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Failed,
    /// Unparseable payload, dropped.
    Poison,
    /// Job already terminal or no longer present; nothing was run.
    Skipped,
}

/// Drives jobs from `created` to a terminal state as their messages arrive.
pub struct JobWorker {
    jobs: Arc<dyn JobStore>,
    executors: Executors,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobStore>, executors: Executors) -> Self {
        Self { jobs, executors }
    }

    /// Consume deliveries until the stream ends. Individual delivery failures never stop the loop.
    pub async fn run(&self, queue: &dyn TaskQueue) -> Result<(), QueueError> {
        let mut deliveries = queue.consume().await?;

        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => {
                    let outcome = self.handle_delivery(delivery).await;
                    tracing::debug!(?outcome, "Delivery settled");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error receiving from queue, will retry");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        Ok(())
    }

    /// Process one delivery and settle it with the broker.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let task = match TaskMessage::from_bytes(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                metrics::counter!("kyc_poison_messages_total").increment(1);
                tracing::warn!(
                    error = %e,
                    payload_len = delivery.payload.len(),
                    "Dropping unparseable queue message"
                );
                settle(delivery.reject(false).await, None);
                return DeliveryOutcome::Poison;
            }
        };

        let job_id = task.job_id();
        let job_type = task.job_type();
        tracing::info!(%job_id, %job_type, "Processing job");

        match self.jobs.transition_to_processing(job_id).await {
            Ok(Transition::Applied) => {}
            Ok(Transition::Skipped(Some(status))) if status.is_terminal() => {
                tracing::info!(%job_id, %status, "Job already settled, skipping redelivery");
                settle(delivery.ack().await, Some(job_id));
                return DeliveryOutcome::Skipped;
            }
            Ok(Transition::Skipped(status)) => {
                tracing::warn!(%job_id, ?status, "Job cannot start processing, dropping message");
                settle(delivery.reject(false).await, Some(job_id));
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to mark job processing");
                self.mark_failed(&task, &e.to_string()).await;
                settle(delivery.reject(false).await, Some(job_id));
                return DeliveryOutcome::Failed;
            }
        }

        let start = Instant::now();
        let executed = self.executors.execute(&task).await;
        metrics::histogram!("kyc_job_processing_seconds", "job_type" => job_type.to_string())
            .record(start.elapsed().as_secs_f64());

        let result = match executed {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%job_id, %job_type, error = %e, "Operation failed");
                self.mark_failed(&task, &e.to_string()).await;
                settle(delivery.reject(false).await, Some(job_id));
                return DeliveryOutcome::Failed;
            }
        };

        match self.jobs.transition_to_completed(job_id, &result).await {
            Ok(Transition::Applied) => {
                metrics::counter!("kyc_jobs_completed_total", "job_type" => job_type.to_string())
                    .increment(1);
                tracing::info!(
                    %job_id,
                    %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                settle(delivery.ack().await, Some(job_id));
                DeliveryOutcome::Completed
            }
            Ok(Transition::Skipped(status)) => {
                tracing::warn!(%job_id, ?status, "Job settled elsewhere before completion was stored");
                settle(delivery.ack().await, Some(job_id));
                DeliveryOutcome::Skipped
            }
            Err(e) => {
                // Left in `processing`; not retried.
                tracing::error!(%job_id, %job_type, error = %e, "Failed to store job result");
                settle(delivery.reject(false).await, Some(job_id));
                DeliveryOutcome::Failed
            }
        }
    }

    async fn mark_failed(&self, task: &TaskMessage, reason: &str) {
        let job_id = task.job_id();
        match self.jobs.transition_to_failed(job_id, reason).await {
            Ok(Transition::Applied) => {
                metrics::counter!("kyc_jobs_failed_total", "job_type" => task.job_type().to_string())
                    .increment(1);
                tracing::info!(%job_id, reason, "Job marked failed");
            }
            Ok(Transition::Skipped(status)) => {
                tracing::warn!(%job_id, ?status, "Job not marked failed, already settled");
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to mark job failed");
            }
        }
    }
}

fn settle(result: Result<(), QueueError>, job_id: Option<Uuid>) {
    if let Err(e) = result {
        tracing::error!(job_id = ?job_id, error = %e, "Failed to settle delivery");
    }
}

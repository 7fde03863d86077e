use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the job pipeline metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("kyc_jobs_submitted_total", "Jobs accepted and queued");
    metrics::describe_counter!(
        "kyc_jobs_deduplicated_total",
        "Submissions answered with an existing job id"
    );
    metrics::describe_counter!("kyc_jobs_completed_total", "Jobs that reached completed");
    metrics::describe_counter!("kyc_jobs_failed_total", "Jobs that reached failed");
    metrics::describe_counter!(
        "kyc_poison_messages_total",
        "Queue messages discarded because they could not be parsed"
    );
    metrics::describe_histogram!(
        "kyc_job_processing_seconds",
        "Time spent running a job's operation"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

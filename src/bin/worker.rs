use kyc_jobs::{
    config::AppConfig,
    db::{self, queries::PgJobStore},
    routes::metrics::describe_metrics,
    services::{
        executor::{Executors, SimulatedFaceMatcher, SimulatedIdCardReader},
        queue::RedisTaskQueue,
        worker::JobWorker,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const RESTART_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let worker_id = config
        .worker_id
        .clone()
        .expect("WORKER_ID must be set to a name no other running worker uses");

    tracing::info!(%worker_id, "Starting kyc job worker");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("WORKER_METRICS_ADDR must be a socket address");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let queue = RedisTaskQueue::new(&config.redis_url, &config.queue_name, &worker_id)
        .expect("Failed to initialize task queue");

    let latency = config.simulated_latency();
    let executors = Executors::new(
        Arc::new(SimulatedFaceMatcher::new(latency)),
        Arc::new(SimulatedIdCardReader::new(latency)),
    )
    .with_timeout(config.executor_timeout());

    let worker = JobWorker::new(Arc::new(PgJobStore::new(db_pool)), executors);

    tracing::info!(queue = %config.queue_name, "Worker ready, consuming jobs");

    loop {
        match queue.queue_depth().await {
            Ok(depth) => tracing::info!(depth, "Pending jobs in queue"),
            Err(e) => tracing::warn!(error = %e, "Could not read queue depth"),
        }

        tokio::select! {
            result = worker.run(&queue) => match result {
                Ok(()) => tracing::warn!("Delivery stream ended, reconnecting"),
                Err(e) => tracing::error!(error = %e, "Worker stopped, will restart"),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, stopping worker");
                break;
            }
        }

        sleep(RESTART_DELAY).await;
    }
}

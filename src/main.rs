use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kyc_jobs::app_state::AppState;
use kyc_jobs::auth::ClientTokenVerifier;
use kyc_jobs::config::AppConfig;
use kyc_jobs::db::{self, image_queries::PgImageStore, queries::PgJobStore};
use kyc_jobs::routes;
use kyc_jobs::services::{
    cache::RedisIdempotencyCache, queue::RedisTaskQueue, results::ResultQueryService,
    submission::SubmissionService,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let jwt_secret = config
        .jwt_secret
        .clone()
        .expect("JWT_SECRET must be set for the API server");

    tracing::info!("Initializing kyc-jobs API server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!(queue = %config.queue_name, "Connecting to Redis");
    // Publishers never consume, so the consumer id only names the connection.
    let queue = Arc::new(
        RedisTaskQueue::new(&config.redis_url, &config.queue_name, "api")
            .expect("Failed to initialize task queue"),
    );
    let cache = Arc::new(
        RedisIdempotencyCache::new(&config.redis_url, config.cache_ttl(), config.cache_timeout())
            .expect("Failed to initialize idempotency cache"),
    );

    let jobs = Arc::new(PgJobStore::new(db_pool.clone()));
    let images = Arc::new(PgImageStore::new(db_pool));

    let submissions = SubmissionService::new(images, jobs.clone(), cache, queue.clone());
    let results = ResultQueryService::new(jobs.clone());
    let state = AppState::new(
        submissions,
        results,
        jobs,
        queue,
        ClientTokenVerifier::new(&jwt_secret),
    );

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting kyc-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

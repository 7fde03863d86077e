use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the task queue and idempotency cache
    pub redis_url: String,

    /// Prefix of the Redis keys backing the task queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Identity of a worker process, unique among live workers. Unsettled messages are
    /// recovered per worker id. Required by the worker; unused by the API server.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// HS256 secret shared with the credential service that issues client tokens
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Lifetime of idempotency cache entries. Entries never expire when unset.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Longest a submission waits on the idempotency cache before treating it as a miss
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Fail jobs whose operation runs longer than this. No limit when unset.
    #[serde(default)]
    pub executor_timeout_secs: Option<u64>,

    /// Address of the worker's Prometheus scrape listener. Disabled when unset.
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,

    /// Latency of the simulated face-match and OCR operations
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "kyc_jobs".to_string()
}

fn default_cache_timeout_ms() -> u64 {
    250
}

fn default_simulated_latency_ms() -> u64 {
    5000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn executor_timeout(&self) -> Option<Duration> {
        self.executor_timeout_secs.map(Duration::from_secs)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

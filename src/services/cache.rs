use async_trait::async_trait;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::JobType;

const KEY_PREFIX: &str = "kyc_jobs:fingerprint";

/// Order-independent digest of a job's semantic inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint `(job_type, client_id, image set)`.
    ///
    /// Each image contributes a `job_type:client_id:image` key. A pair of keys is
    /// sorted and joined before hashing so swapping the pair yields the same digest.
    pub fn compute(job_type: JobType, client_id: i64, image_refs: &[String]) -> Self {
        let mut keys: Vec<String> = image_refs
            .iter()
            .map(|image| format!("{job_type}:{client_id}:{image}"))
            .collect();

        let digest = match keys.as_mut_slice() {
            [single] => Sha256::digest(single.as_bytes()),
            pair => {
                pair.sort_unstable();
                Sha256::digest(pair.join("\n").as_bytes())
            }
        };

        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of an idempotency lookup. Backend failures are reported as `Miss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Uuid),
    Miss,
}

/// Best-effort fingerprint → job id cache. Never authoritative, never fails the caller.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup;

    /// Record a mapping without waiting for the backend.
    fn set(&self, fingerprint: &Fingerprint, job_id: Uuid);
}

/// Redis-backed idempotency cache.
pub struct RedisIdempotencyCache {
    client: redis::Client,
    ttl: Option<Duration>,
    lookup_timeout: Duration,
}

impl RedisIdempotencyCache {
    pub fn new(
        redis_url: &str,
        ttl: Option<Duration>,
        lookup_timeout: Duration,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            ttl,
            lookup_timeout,
        })
    }

    fn key(fingerprint: &Fingerprint) -> String {
        format!("{KEY_PREFIX}:{fingerprint}")
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(key).await
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup {
        let key = Self::key(fingerprint);
        let fetched = match tokio::time::timeout(self.lookup_timeout, self.fetch(&key)).await {
            Ok(fetched) => fetched,
            Err(_) => {
                tracing::warn!(
                    %fingerprint,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Cache lookup timed out, treating as miss"
                );
                return CacheLookup::Miss;
            }
        };

        match fetched {
            Ok(Some(value)) => match Uuid::parse_str(&value) {
                Ok(job_id) => CacheLookup::Hit(job_id),
                Err(e) => {
                    tracing::warn!(%fingerprint, error = %e, "Ignoring malformed cache entry");
                    CacheLookup::Miss
                }
            },
            Ok(None) => CacheLookup::Miss,
            Err(e) => {
                tracing::warn!(%fingerprint, error = %e, "Cache lookup failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    fn set(&self, fingerprint: &Fingerprint, job_id: Uuid) {
        let client = self.client.clone();
        let key = Self::key(fingerprint);
        let ttl = self.ttl;
        let fingerprint = fingerprint.clone();

        tokio::spawn(async move {
            let result = async {
                let mut conn = client.get_multiplexed_async_connection().await?;
                match ttl {
                    Some(ttl) => {
                        conn.set_ex::<_, _, ()>(&key, job_id.to_string(), ttl.as_secs().max(1))
                            .await
                    }
                    None => conn.set::<_, _, ()>(&key, job_id.to_string()).await,
                }
            }
            .await;

            if let Err(e) = result {
                tracing::warn!(%fingerprint, %job_id, error = %e, "Failed to write cache entry");
            }
        });
    }
}

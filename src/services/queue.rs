use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::JobType;

/// Seconds a consumer blocks on an empty queue before polling again.
const BLOCK_TIMEOUT_SECS: f64 = 5.0;

/// Work item published once per accepted submission.
///
/// Serialized as `{"type": "face_match", "msg": {"job_id": ..., "image1": ..., "image2": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "msg", rename_all = "snake_case")]
pub enum TaskMessage {
    FaceMatch(FaceMatchTask),
    Ocr(OcrTask),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceMatchTask {
    pub job_id: Uuid,
    pub image1: String,
    pub image2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrTask {
    pub job_id: Uuid,
    pub image: String,
}

impl TaskMessage {
    /// Build the message for a job from its submitted image references.
    pub fn new(job_type: JobType, job_id: Uuid, image_refs: &[String]) -> Option<Self> {
        match (job_type, image_refs) {
            (JobType::FaceMatch, [image1, image2]) => Some(TaskMessage::FaceMatch(FaceMatchTask {
                job_id,
                image1: image1.clone(),
                image2: image2.clone(),
            })),
            (JobType::Ocr, [image]) => Some(TaskMessage::Ocr(OcrTask {
                job_id,
                image: image.clone(),
            })),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            TaskMessage::FaceMatch(task) => task.job_id,
            TaskMessage::Ocr(task) => task.job_id,
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            TaskMessage::FaceMatch(_) => JobType::FaceMatch,
            TaskMessage::Ocr(_) => JobType::Ocr,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(QueueError::Serialize)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(payload).map_err(QueueError::Serialize)
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;
}

/// A message handed to a consumer. Must be settled with [`Delivery::ack`] or [`Delivery::reject`];
/// an unsettled delivery is redelivered after the consumer restarts.
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Durable, at-least-once task channel.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist a message. Returns only after the broker has accepted it.
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Open an effectively infinite stream of deliveries for this consumer.
    async fn consume(&self) -> Result<DeliveryStream, QueueError>;

    /// Check broker connectivity.
    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue.
///
/// Consumers move each message atomically from the pending list into a
/// per-consumer in-flight list (`BLMOVE`). Acking removes it from the in-flight
/// list; on startup a consumer moves anything left in its in-flight list back
/// to the pending list, which is where redelivery after a crash comes from.
///
/// An in-flight list belongs to exactly one live consumer. `consume` claims a
/// lease on the consumer id and refuses to start while another instance holds
/// it; a consumer that loses its lease ends its stream.
pub struct RedisTaskQueue {
    client: redis::Client,
    consumer_id: String,
    queue_key: String,
    in_flight_key: String,
    lease_key: String,
    lease_token: String,
    lease_ttl: Duration,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str, queue_name: &str, consumer_id: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            consumer_id: consumer_id.to_string(),
            queue_key: format!("{queue_name}:pending"),
            in_flight_key: format!("{queue_name}:in_flight:{consumer_id}"),
            lease_key: format!("{queue_name}:consumer:{consumer_id}"),
            lease_token: Uuid::new_v4().to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
        })
    }

    /// How long a consumer-id lease survives without a refresh.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Get the current queue depth (pending messages).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await?;
        Ok(depth)
    }

    /// Move messages a previous run of this consumer never settled back onto the queue.
    pub async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&self.in_flight_key)
                .arg(&self.queue_key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    fn lease(&self) -> Lease {
        Lease {
            client: self.client.clone(),
            key: self.lease_key.clone(),
            token: self.lease_token.clone(),
            ttl: self.lease_ttl,
        }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;
        Ok(())
    }

    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        let lease = self.lease();
        if !lease.claim().await? {
            return Err(QueueError::ConsumerIdInUse(self.consumer_id.clone()));
        }

        let recovered = self.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!(
                recovered,
                queue = %self.queue_key,
                "Requeued unsettled messages from a previous run"
            );
        }

        let lost = Arc::new(AtomicBool::new(false));
        let state = ConsumerState {
            client: self.client.clone(),
            blocking: None,
            queue_key: self.queue_key.clone(),
            in_flight_key: self.in_flight_key.clone(),
            lease_lost: Arc::clone(&lost),
            _refresh: RefreshTask(tokio::spawn(lease.keep_alive(lost))),
        };

        let deliveries = stream::unfold(state, |mut state| async move {
            loop {
                if state.lease_lost.load(Ordering::SeqCst) {
                    return None;
                }

                // A dropped connection is rebuilt on the next poll.
                if state.blocking.is_none() {
                    match state.client.get_multiplexed_async_connection().await {
                        Ok(conn) => state.blocking = Some(conn),
                        Err(e) => return Some((Err(QueueError::Redis(e)), state)),
                    }
                }
                let Some(conn) = state.blocking.as_mut() else {
                    continue;
                };

                let popped: Result<Option<Vec<u8>>, redis::RedisError> = redis::cmd("BLMOVE")
                    .arg(&state.queue_key)
                    .arg(&state.in_flight_key)
                    .arg("RIGHT")
                    .arg("LEFT")
                    .arg(BLOCK_TIMEOUT_SECS)
                    .query_async(conn)
                    .await;

                match popped {
                    Ok(Some(payload)) => {
                        let acker = RedisAcknowledger {
                            client: state.client.clone(),
                            queue_key: state.queue_key.clone(),
                            in_flight_key: state.in_flight_key.clone(),
                            payload: payload.clone(),
                        };
                        let delivery = Delivery::new(payload, Box::new(acker));
                        return Some((Ok(delivery), state));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        state.blocking = None;
                        return Some((Err(QueueError::Redis(e)), state));
                    }
                }
            }
        });

        Ok(Box::pin(deliveries))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Sets the lease to our token when it is free or already ours.
const LEASE_SCRIPT: &str = r"
local holder = redis.call('GET', KEYS[1])
if holder == false or holder == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
end
return 0
";

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

struct Lease {
    client: redis::Client,
    key: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    async fn claim(&self) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ttl_ms = self.ttl.as_millis().max(1) as u64;
        let claimed: i64 = redis::Script::new(LEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(claimed == 1)
    }

    /// Refresh the lease until another consumer takes it over.
    async fn keep_alive(self, lost: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.ttl / 3);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.claim().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::error!(lease = %self.key, "Consumer lease taken over, stopping consumer");
                    lost.store(true, Ordering::SeqCst);
                    return;
                }
                Err(e) => tracing::warn!(lease = %self.key, error = %e, "Failed to refresh consumer lease"),
            }
        }
    }
}

struct RefreshTask(JoinHandle<()>);

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ConsumerState {
    client: redis::Client,
    blocking: Option<MultiplexedConnection>,
    queue_key: String,
    in_flight_key: String,
    lease_lost: Arc<AtomicBool>,
    _refresh: RefreshTask,
}

struct RedisAcknowledger {
    client: redis::Client,
    queue_key: String,
    in_flight_key: String,
    payload: Vec<u8>,
}

#[async_trait]
impl Acknowledger for RedisAcknowledger {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(&self.in_flight_key, 1, &self.payload)
            .await?;
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.in_flight_key, 1, &self.payload)
            .ignore();
        if requeue {
            pipe.lpush(&self.queue_key, &self.payload).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Consumer id {0:?} is held by another live consumer")]
    ConsumerIdInUse(String),
}

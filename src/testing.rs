//! In-memory backends for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db::image_queries::ImageStore;
use crate::db::queries::{CreateOutcome, JobStore, JobStoreError, Transition};
use crate::models::image::{ImageKind, UploadedImage};
use crate::models::job::{Job, JobResult, JobStatus, JobType, NewJob};
use crate::services::cache::{CacheLookup, Fingerprint, IdempotencyCache};
use crate::services::queue::{Acknowledger, Delivery, DeliveryStream, QueueError, TaskQueue};

fn injected() -> JobStoreError {
    JobStoreError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, UploadedImage>>,
}

impl MemoryImageStore {
    pub fn insert(&self, reference: &str, kind: ImageKind, client_id: i64) {
        let mut images = self.images.lock().unwrap();
        let id = images.len() as i64 + 1;
        images.insert(
            reference.to_string(),
            UploadedImage {
                id,
                reference: reference.to_string(),
                kind,
                client_id,
                storage_path: format!("{client_id}/{reference}.png"),
                size_kb: 120,
            },
        );
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn get_by_reference(&self, reference: &str) -> Result<Option<UploadedImage>, JobStoreError> {
        Ok(self.images.lock().unwrap().get(reference).cloned())
    }
}

/// Job store keeping rows in a map, with switches to inject write failures.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    fingerprints: Mutex<HashMap<String, Uuid>>,
    pub fail_processing: AtomicBool,
    pub fail_terminal_writes: AtomicBool,
    pub fail_create: AtomicBool,
    /// Report the current status instead of starting the job.
    pub refuse_processing: AtomicBool,
}

impl MemoryJobStore {
    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.job(job_id).map(|job| job.status)
    }

    fn transition(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        apply: impl FnOnce(&mut Job),
    ) -> Transition {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if from.contains(&job.status) => {
                apply(job);
                Transition::Applied
            }
            Some(job) => Transition::Skipped(Some(job.status)),
            None => Transition::Skipped(None),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: &NewJob) -> Result<CreateOutcome, JobStoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let mut fingerprints = self.fingerprints.lock().unwrap();
        if let Some(existing) = fingerprints.get(&new.fingerprint) {
            return Ok(CreateOutcome::Existing(*existing));
        }
        fingerprints.insert(new.fingerprint.clone(), new.job_id);
        self.jobs.lock().unwrap().insert(
            new.job_id,
            Job {
                job_id: new.job_id,
                job_type: new.job_type,
                client_id: new.client_id,
                input_image_ids: new.input_image_ids.clone(),
                status: JobStatus::Created,
                created_at: Utc::now(),
                processed_at: None,
                completed_at: None,
                failed_at: None,
                failed_reason: None,
                result: None,
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn abandon_unqueued_job(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError> {
        let abandoned = self.transition(job_id, &[JobStatus::Created], |job| {
            job.status = JobStatus::Failed;
            job.failed_at = Some(Utc::now());
            job.failed_reason = Some(reason.to_string());
        });
        if abandoned == Transition::Applied {
            self.fingerprints.lock().unwrap().retain(|_, id| *id != job_id);
        }
        Ok(())
    }

    async fn transition_to_processing(&self, job_id: Uuid) -> Result<Transition, JobStoreError> {
        if self.fail_processing.load(Ordering::SeqCst) {
            return Err(injected());
        }
        if self.refuse_processing.load(Ordering::SeqCst) {
            return Ok(self.transition(job_id, &[], |_| {}));
        }
        Ok(self.transition(job_id, &[JobStatus::Created, JobStatus::Processing], |job| {
            job.status = JobStatus::Processing;
            job.processed_at = Some(Utc::now());
        }))
    }

    async fn transition_to_completed(
        &self,
        job_id: Uuid,
        result: &JobResult,
    ) -> Result<Transition, JobStoreError> {
        if self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(self.transition(job_id, &[JobStatus::Processing], |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result.clone());
        }))
    }

    async fn transition_to_failed(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<Transition, JobStoreError> {
        if self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(self.transition(job_id, &[JobStatus::Created, JobStatus::Processing], |job| {
            job.status = JobStatus::Failed;
            job.failed_at = Some(Utc::now());
            job.failed_reason = Some(reason.to_string());
        }))
    }

    async fn get_by_job_id(
        &self,
        job_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<Job>, JobStoreError> {
        Ok(self.job(job_id).filter(|job| job.job_type == job_type))
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        Ok(())
    }
}

/// Cache that can be switched into a broken state, where every lookup misses.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<Fingerprint, Uuid>>,
    pub broken: AtomicBool,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[async_trait]
impl IdempotencyCache for MemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> CacheLookup {
        if self.broken.load(Ordering::SeqCst) {
            return CacheLookup::Miss;
        }
        match self.entries.lock().unwrap().get(fingerprint) {
            Some(job_id) => CacheLookup::Hit(*job_id),
            None => CacheLookup::Miss,
        }
    }

    fn set(&self, fingerprint: &Fingerprint, job_id: Uuid) {
        if self.broken.load(Ordering::SeqCst) {
            return;
        }
        self.entries.lock().unwrap().insert(fingerprint.clone(), job_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked(Vec<u8>),
    Rejected { payload: Vec<u8>, requeue: bool },
}

/// Queue whose `consume` drains whatever is pending at call time.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
    pub fail_publish: AtomicBool,
}

impl MemoryQueue {
    pub fn pending(&self) -> Vec<Vec<u8>> {
        self.pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }

    pub fn push_raw(&self, payload: &[u8]) {
        self.pending.lock().unwrap().push_back(payload.to_vec());
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "broker unavailable",
            ))));
        }
        self.push_raw(payload);
        Ok(())
    }

    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        let drained: Vec<Vec<u8>> = self.pending.lock().unwrap().drain(..).collect();
        let pending = Arc::clone(&self.pending);
        let settlements = Arc::clone(&self.settlements);

        let deliveries = drained.into_iter().map(move |payload| {
            let acker = MemoryAcknowledger {
                payload: payload.clone(),
                pending: Arc::clone(&pending),
                settlements: Arc::clone(&settlements),
            };
            Ok(Delivery::new(payload, Box::new(acker)))
        });

        Ok(Box::pin(stream::iter(deliveries.collect::<Vec<_>>())))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

struct MemoryAcknowledger {
    payload: Vec<u8>,
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.settlements
            .lock()
            .unwrap()
            .push(Settlement::Acked(self.payload.clone()));
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        if requeue {
            self.pending.lock().unwrap().push_back(self.payload.clone());
        }
        self.settlements.lock().unwrap().push(Settlement::Rejected {
            payload: self.payload.clone(),
            requeue,
        });
        Ok(())
    }
}

/// TCP listener that accepts connections and never answers.
pub struct SilentServer {
    pub url: String,
    accept: tokio::task::JoinHandle<()>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Self { url, accept }
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// Reply a [`FakeRedis`] sends for one command.
pub enum Reply {
    Status(&'static str),
    Int(i64),
    Bulk(Vec<u8>),
    Nil,
    /// Close the connection without answering.
    Hangup,
}

type Responder = dyn Fn(&str) -> Reply + Send + Sync;

/// Minimal RESP2 server. Each command is answered by a responder keyed on the
/// upper-cased command name; every command received is recorded.
pub struct FakeRedis {
    pub url: String,
    commands: Arc<Mutex<Vec<String>>>,
    accept: tokio::task::JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start(responder: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let commands = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let recorded = Arc::clone(&commands);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let responder = Arc::clone(&responder);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(serve_connection(socket, responder, recorded));
            }
        });

        Self { url, commands, accept }
    }

    /// Number of times `name` was received across all connections.
    pub fn count(&self, name: &str) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| *c == name).count()
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve_connection(
    socket: tokio::net::TcpStream,
    responder: Arc<Responder>,
    recorded: Arc<Mutex<Vec<String>>>,
) {
    use tokio::io::{AsyncWriteExt, BufReader};

    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let Some(name) = args.first() else { continue };
        let name = String::from_utf8_lossy(name).to_uppercase();
        recorded.lock().unwrap().push(name.clone());

        let encoded = match responder(&name) {
            Reply::Status(status) => format!("+{status}\r\n").into_bytes(),
            Reply::Int(value) => format!(":{value}\r\n").into_bytes(),
            Reply::Bulk(bytes) => {
                let mut out = format!("${}\r\n", bytes.len()).into_bytes();
                out.extend_from_slice(&bytes);
                out.extend_from_slice(b"\r\n");
                out
            }
            Reply::Nil => b"$-1\r\n".to_vec(),
            Reply::Hangup => return,
        };
        if write.write_all(&encoded).await.is_err() {
            return;
        }
    }
}

async fn read_command<R>(reader: &mut R) -> std::io::Result<Option<Vec<Vec<u8>>>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count: usize = line.trim_end().trim_start_matches('*').parse().unwrap_or(0);

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line.trim_end().trim_start_matches('$').parse().unwrap_or(0);
        let mut arg = vec![0; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    Ok(Some(args))
}

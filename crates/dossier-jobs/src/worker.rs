//! Worker pool that polls the job store and applies the retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use dossier_core::{
    defaults, DeadLetterReason, Error, Job, JobRepository, JobStatus, JobType, NewJob, Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::retry::{record_failure, record_success, FailureOutcome};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Number of independent poll loops.
    pub worker_count: usize,
    /// Sleep after an empty poll.
    pub idle_backoff: Duration,
    /// Sleep after a job store error.
    pub store_error_backoff: Duration,
    /// Bound on a single handler invocation.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: defaults::JOB_WORKER_COUNT,
            idle_backoff: Duration::from_millis(defaults::JOB_IDLE_BACKOFF_MS),
            store_error_backoff: Duration::from_millis(defaults::JOB_STORE_ERROR_BACKOFF_MS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_WORKER_COUNT` | `4` | Concurrent poll loops |
    /// | `JOB_IDLE_BACKOFF_MS` | `500` | Sleep when the queue is empty |
    /// | `JOB_STORE_ERROR_BACKOFF_MS` | `1000` | Sleep after a store error |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job handler timeout |
    pub fn from_env() -> Self {
        let base = Self::default();

        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_count = std::env::var("JOB_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.worker_count)
            .max(1);

        let millis = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(base.job_timeout);

        Self {
            enabled,
            worker_count,
            idle_backoff: millis("JOB_IDLE_BACKOFF_MS", base.idle_backoff),
            store_error_backoff: millis("JOB_STORE_ERROR_BACKOFF_MS", base.store_error_backoff),
            job_timeout,
        }
    }

    /// Values below 1 are treated as 1.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_store_error_backoff(mut self, backoff: Duration) -> Self {
        self.store_error_backoff = backoff;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A poll loop started.
    WorkerStarted { worker_id: usize },
    /// A job was claimed and dispatched.
    JobStarted {
        job_id: Uuid,
        job_type: String,
        worker_id: usize,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: String },
    /// A job failed and will run again later.
    JobRetryScheduled {
        job_id: Uuid,
        job_type: String,
        attempts: i32,
        next_try_at: DateTime<Utc>,
        error: String,
    },
    /// A job left the queue for good.
    JobDeadLettered {
        job_id: Uuid,
        job_type: String,
        reason: DeadLetterReason,
        error: String,
    },
    /// A poll loop stopped.
    WorkerStopped { worker_id: usize },
}

type HandlerMap = Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>;

/// State shared by every poll loop.
struct PoolShared {
    store: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl PoolShared {
    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Handle for controlling a running pool.
pub struct WorkerHandle {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerHandle {
    /// Stop polling and wait for every in-flight job to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.supervisor
            .await
            .map_err(|e| Error::Internal(format!("worker supervisor failed: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Token that stops the pool when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Pool of independent poll loops sharing one job store.
pub struct JobWorker {
    shared: Arc<PoolShared>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(PoolShared {
                store,
                config,
                handlers: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            }),
        }
    }

    /// Register a handler for its job type, replacing any previous one.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        self.register_arc(Arc::new(handler)).await;
    }

    async fn register_arc(&self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        let mut handlers = self.shared.handlers.write().await;
        handlers.insert(job_type.as_str().to_string(), handler);
        debug!(%job_type, "Registered job handler");
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Serialize `payload` as JSON and enqueue it, scheduled now.
    ///
    /// A `max_attempts` below 1 selects the default.
    pub async fn enqueue<T: Serialize>(
        &self,
        job_type: JobType,
        payload: &T,
        priority: i32,
        max_attempts: i32,
    ) -> Result<Uuid> {
        enqueue_json(
            self.shared.store.as_ref(),
            job_type,
            payload,
            priority,
            max_attempts,
        )
        .await
    }

    /// Spawn the poll loops and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let event_tx = self.shared.event_tx.clone();

        if !self.shared.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "Job worker is disabled, not starting"
            );
            return WorkerHandle {
                cancel,
                supervisor: tokio::spawn(async {}),
                event_tx,
            };
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            worker_count = self.shared.config.worker_count,
            idle_backoff_ms = self.shared.config.idle_backoff.as_millis() as u64,
            job_timeout_secs = self.shared.config.job_timeout.as_secs(),
            "Job worker pool starting"
        );

        let mut loops = JoinSet::new();
        for worker_id in 0..self.shared.config.worker_count {
            let shared = self.shared.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { poll_loop(shared, worker_id, cancel).await });
        }

        let supervisor = tokio::spawn(async move {
            while let Some(result) = loops.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Worker loop panicked");
                }
            }
            info!(subsystem = "jobs", component = "worker", "Job worker pool stopped");
        });

        WorkerHandle {
            cancel,
            supervisor,
            event_tx,
        }
    }
}

/// Enqueue a JSON payload through any job store.
pub async fn enqueue_json<T: Serialize>(
    store: &dyn JobRepository,
    job_type: JobType,
    payload: &T,
    priority: i32,
    max_attempts: i32,
) -> Result<Uuid> {
    let job = NewJob::json(job_type.as_str(), payload)?
        .with_priority(priority)
        .with_max_attempts(max_attempts);
    let id = store.enqueue(job).await?;
    debug!(subsystem = "jobs", job_id = %id, %job_type, priority, "Job enqueued");
    Ok(id)
}

/// Sleep unless cancelled first. Returns true when cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[instrument(skip(shared, cancel), fields(subsystem = "jobs", component = "worker"))]
async fn poll_loop(shared: Arc<PoolShared>, worker_id: usize, cancel: CancellationToken) {
    shared.emit(WorkerEvent::WorkerStarted { worker_id });
    debug!("Worker loop started");

    while !cancel.is_cancelled() {
        match shared.store.fetch_next_eligible().await {
            Ok(Some(job)) => dispatch(&shared, worker_id, job, &cancel).await,
            Ok(None) => {
                if sleep_or_cancel(shared.config.idle_backoff, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch next job");
                if sleep_or_cancel(shared.config.store_error_backoff, &cancel).await {
                    break;
                }
            }
        }
    }

    shared.emit(WorkerEvent::WorkerStopped { worker_id });
    debug!("Worker loop stopped");
}

/// Run one claimed job to an outcome and persist it.
async fn dispatch(shared: &PoolShared, worker_id: usize, mut job: Job, cancel: &CancellationToken) {
    let start = Instant::now();
    let job_id = job.id;
    let job_type = job.job_type.clone();

    info!(%job_id, %job_type, attempts = job.attempts, "Processing job");
    shared.emit(WorkerEvent::JobStarted {
        job_id,
        job_type: job_type.clone(),
        worker_id,
    });

    let handler = {
        let handlers = shared.handlers.read().await;
        handlers.get(&job_type).cloned()
    };

    let Some(handler) = handler else {
        let message = format!("no handler registered for job type {}", job_type);
        job.last_error = Some(message.clone());
        job.status = JobStatus::Failed;
        error!(%job_id, %job_type, "No handler registered, dead-lettering job");
        dead_letter(shared, &job, DeadLetterReason::NoHandler, message).await;
        return;
    };

    // The handler runs in its own task so a panic fails the job, not the loop.
    let ctx = JobContext::new(job.clone()).with_cancellation(cancel.child_token());
    let timeout = shared.config.job_timeout;
    let mut task = tokio::spawn(async move { handler.execute(ctx).await });
    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(%job_id, %job_type, error = %e, "Job task panicked");
            JobResult::Failed(format!("job task panicked: {}", e))
        }
        Err(_) => {
            task.abort();
            warn!(%job_id, %job_type, timeout_secs = timeout.as_secs(), "Job exceeded timeout");
            JobResult::Failed(format!("job exceeded timeout of {}s", timeout.as_secs()))
        }
    };

    let now = Utc::now();
    match result {
        JobResult::Success(_) => {
            record_success(&mut job, now);
            if let Err(e) = shared.store.update(&job).await {
                error!(error = %e, %job_id, "Failed to mark job as done");
                return;
            }
            info!(
                %job_id,
                %job_type,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job completed successfully"
            );
            shared.emit(WorkerEvent::JobCompleted { job_id, job_type });
        }
        JobResult::Failed(message) => match record_failure(&mut job, &message, now) {
            FailureOutcome::Retry { next_try_at } => {
                if let Err(e) = shared.store.update(&job).await {
                    error!(error = %e, %job_id, "Failed to schedule job retry");
                    return;
                }
                warn!(
                    %job_id,
                    %job_type,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    %next_try_at,
                    error = %message,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed, retry scheduled"
                );
                shared.emit(WorkerEvent::JobRetryScheduled {
                    job_id,
                    job_type,
                    attempts: job.attempts,
                    next_try_at,
                    error: message,
                });
            }
            FailureOutcome::DeadLetter => {
                warn!(
                    %job_id,
                    %job_type,
                    attempts = job.attempts,
                    error = %message,
                    "Job exhausted its attempts, dead-lettering"
                );
                dead_letter(shared, &job, DeadLetterReason::RetriesExhausted, message).await;
            }
        },
    }
}

async fn dead_letter(shared: &PoolShared, job: &Job, reason: DeadLetterReason, message: String) {
    if let Err(e) = shared.store.move_to_dead_letter(job, reason).await {
        error!(error = %e, job_id = %job.id, "Failed to dead-letter job");
        return;
    }
    shared.emit(WorkerEvent::JobDeadLettered {
        job_id: job.id,
        job_type: job.job_type.clone(),
        reason,
        error: message,
    });
}

/// Builder for creating a worker pool with handlers.
pub struct WorkerBuilder {
    store: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
}

impl WorkerBuilder {
    pub fn new(store: Arc<dyn JobRepository>) -> Self {
        Self {
            store,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Build and return the pool.
    pub async fn build(self) -> JobWorker {
        let worker = JobWorker::new(self.store, self.config);
        for handler in self.handlers {
            worker.register_arc(handler).await;
        }
        worker
    }
}

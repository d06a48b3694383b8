//! Job handlers for each job type.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dossier_core::{Error, Job, JobType, Result};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the pool's shutdown token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Fired when the pool is shutting down. The worker still waits for the
    /// handler to return; handlers may use it to stop long waits early.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Decode the JSON payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.job.payload).map_err(|e| {
            Error::Job(format!(
                "invalid {} payload for job {}: {}",
                self.job.job_type, self.job.id, e
            ))
        })
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed; the retry policy decides what happens next.
    Failed(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

impl From<Result<Option<JsonValue>>> for JobResult {
    fn from(result: Result<Option<JsonValue>>) -> Self {
        match result {
            Ok(data) => JobResult::Success(data),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type tag.
    fn can_handle(&self, job_type: &str) -> bool {
        self.job_type().as_str() == job_type
    }
}

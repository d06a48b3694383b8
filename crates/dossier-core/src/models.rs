//! Domain models shared across dossier crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{defaults, Error};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Retry,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Retry => "retry",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Queued and retry jobs are still waiting to run.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retry)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "retry" => Ok(JobStatus::Retry),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

/// Job types with a statically registered handler.
///
/// Jobs carry their type as a plain tag so that rows written with a tag this
/// build does not know about still reach the dead-letter path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Run an activity through the inference engine.
    #[serde(rename = "ai.analyze_activity")]
    AnalyzeActivity,
    /// Fold an inference result into the engineer's context.
    #[serde(rename = "ai.process_response")]
    ProcessResponse,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::AnalyzeActivity => "ai.analyze_activity",
            JobType::ProcessResponse => "ai.process_response",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai.analyze_activity" => Ok(JobType::AnalyzeActivity),
            "ai.process_response" => Ok(JobType::ProcessResponse),
            other => Err(Error::InvalidInput(format!("unknown job type: {other}"))),
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    /// Opaque serialized payload; handlers decide the encoding.
    pub payload: Vec<u8>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    /// Lower values are served first.
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub next_try_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job may be dispatched at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active()
            && self.next_try_at.map_or(true, |t| t <= now)
            && self.scheduled_at <= now
    }
}

/// Request to enqueue a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub max_attempts: i32,
    /// Defaults to now.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: defaults::JOB_PRIORITY,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            scheduled_at: None,
        }
    }

    /// Serialize `payload` as JSON.
    pub fn json<T: Serialize>(job_type: impl Into<String>, payload: &T) -> crate::Result<Self> {
        Ok(Self::new(job_type, serde_json::to_vec(payload)?))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Values below 1 fall back to the default.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = if max_attempts > 0 {
            max_attempts
        } else {
            defaults::JOB_MAX_ATTEMPTS
        };
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Materialize the job row as it is first stored.
    pub fn into_job(self, id: Uuid, now: DateTime<Utc>) -> Job {
        Job {
            id,
            job_type: self.job_type,
            payload: self.payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            priority: self.priority,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            next_try_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Why a job left the active queue for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// No handler is registered for the job's type.
    NoHandler,
    /// The handler failed `max_attempts` times.
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::NoHandler => "no_handler",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl FromStr for DeadLetterReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_handler" => Ok(DeadLetterReason::NoHandler),
            "retries_exhausted" => Ok(DeadLetterReason::RetriesExhausted),
            other => Err(Error::InvalidInput(format!(
                "unknown dead-letter reason: {other}"
            ))),
        }
    }
}

/// Permanent copy of a job that will never run again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_type: String,
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub reason: DeadLetterReason,
    pub failed_at: DateTime<Utc>,
}

// =============================================================================
// INFERENCE
// =============================================================================

/// An activity report submitted by an engineer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub engineer_id: i64,
    #[serde(rename = "activity")]
    pub text: String,
}

/// Entities extracted from an activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default, deserialize_with = "nullable_list")]
    pub people: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub projects: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub technologies: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty() && self.projects.is_empty() && self.technologies.is_empty()
    }

    /// Lists keyed by their context document field name.
    pub fn fields(&self) -> [(&'static str, &[String]); 3] {
        [
            ("people", &self.people),
            ("projects", &self.projects),
            ("technologies", &self.technologies),
        ]
    }
}

/// `null` entity lists become empty lists.
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Structured result of analyzing one activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AIResponse {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Whether the model thinks this activity should change stored context.
    #[serde(default)]
    pub context_update: bool,
    #[serde(default)]
    pub reasoning: String,
    /// Raw model output, kept for audit. Never serialized.
    #[serde(skip)]
    pub raw: String,
}

impl AIResponse {
    pub fn is_low_confidence(&self, min: f64) -> bool {
        self.confidence.is_some_and(|c| c < min)
    }
}

/// A model advertised by the inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Metadata describing one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub model: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}

/// Generated text plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub meta: GenerationMeta,
}

/// A JSON Schema stored under a version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub version: String,
    pub schema: JsonValue,
}

/// A prompt template stored under `(name, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub text: String,
    /// Schema used to validate responses; falls back to the response's own version.
    pub schema_version: Option<String>,
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Who produced a context version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedBy {
    Ai,
    User,
    Rollback,
}

impl AppliedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedBy::Ai => "ai",
            AppliedBy::User => "user",
            AppliedBy::Rollback => "rollback",
        }
    }
}

impl fmt::Display for AppliedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppliedBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(AppliedBy::Ai),
            "user" => Ok(AppliedBy::User),
            "rollback" => Ok(AppliedBy::Rollback),
            other => Err(Error::InvalidInput(format!("unknown applied_by: {other}"))),
        }
    }
}

/// One field altered between two context versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub key: String,
    /// `null` when the key did not exist before.
    pub old_value: JsonValue,
    /// `null` when the key was removed.
    pub new_value: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// The current context document of an engineer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub engineer_id: i64,
    pub context: JsonValue,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit record of one context version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub engineer_id: i64,
    pub context: JsonValue,
    pub changes: Option<Vec<ChangeRecord>>,
    pub conflicts: Option<Vec<String>>,
    pub applied_by: AppliedBy,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

/// Request to append a history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub engineer_id: i64,
    pub context: JsonValue,
    pub changes: Option<Vec<ChangeRecord>>,
    pub conflicts: Option<Vec<String>>,
    pub applied_by: AppliedBy,
    pub version: i32,
}

/// A clarification request raised for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub engineer_id: i64,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

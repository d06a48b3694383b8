//! Collaborator traits consumed by the pipeline.
//!
//! Storage is reached only through these narrow interfaces; `dossier-db`
//! provides Postgres and in-memory implementations.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    AppliedBy, ContextSnapshot, DeadLetterJob, DeadLetterReason, Generation, HistoryEntry, Job,
    ModelInfo, NewHistoryEntry, NewJob, PromptTemplate, Result, SchemaRecord,
};

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable job queue.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a new job and return its id.
    async fn enqueue(&self, job: NewJob) -> Result<Uuid>;

    /// Atomically claim the next eligible job.
    ///
    /// Eligible jobs are served by ascending `(priority, scheduled_at)`. A
    /// claimed job is invisible to other callers until it is updated or its
    /// claim lease runs out.
    async fn fetch_next_eligible(&self) -> Result<Option<Job>>;

    /// Persist the job's mutable fields and release its claim.
    async fn update(&self, job: &Job) -> Result<()>;

    /// Copy the job into the dead-letter store and delete it, as one unit.
    async fn move_to_dead_letter(&self, job: &Job, reason: DeadLetterReason) -> Result<()>;

    /// Look up an active or finished job.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Dead-letter records, oldest first.
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterJob>>;
}

// =============================================================================
// CONTEXT STORE
// =============================================================================

/// Versioned per-engineer context documents and their history.
#[async_trait]
pub trait ContextRepository: Send + Sync {
    /// Current document, if the engineer has one.
    async fn get_current(&self, engineer_id: i64) -> Result<Option<ContextSnapshot>>;

    /// Replace the current document, bump its version, and append a minimal
    /// history row. Returns the new version (1 for the first write).
    async fn upsert_current(
        &self,
        engineer_id: i64,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32>;

    /// Like [`upsert_current`](Self::upsert_current), but only if the stored
    /// version still equals `expected_version` (0 when the engineer has no
    /// document yet). Fails with [`Error::VersionConflict`] otherwise, leaving
    /// the store untouched.
    async fn replace_current(
        &self,
        engineer_id: i64,
        expected_version: i32,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32>;

    /// Append a history entry and return its id.
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<i64>;

    /// All history of an engineer, newest first.
    async fn get_history(&self, engineer_id: i64) -> Result<Vec<HistoryEntry>>;

    /// One history entry, scoped to the engineer.
    async fn get_history_by_id(
        &self,
        engineer_id: i64,
        history_id: i64,
    ) -> Result<Option<HistoryEntry>>;
}

// =============================================================================
// PROMPT STORES
// =============================================================================

/// Versioned JSON Schemas.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<SchemaRecord>>;
}

/// Versioned prompt templates.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get_by_name_version(&self, name: &str, version: &str)
        -> Result<Option<PromptTemplate>>;
}

/// Destination for clarification questions.
#[async_trait]
pub trait QuestionSink: Send + Sync {
    /// Create a question and return its id.
    async fn create(&self, engineer_id: i64, question: &str) -> Result<i64>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text for `prompt` with the named model.
    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation>;

    /// Succeeds when the backend lists at least one model.
    async fn health(&self) -> Result<()>;

    /// Models available on the backend.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

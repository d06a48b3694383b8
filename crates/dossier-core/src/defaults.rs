//! Centralized default constants for dossier.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in every crate fall back to these when an environment
//! variable is unset or unparsable.

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Maximum attempts before a job is dead-lettered.
pub const JOB_MAX_ATTEMPTS: i32 = 5;

/// Default job priority. Lower values are served first.
pub const JOB_PRIORITY: i32 = 100;

/// Number of independent poll loops in the worker pool.
pub const JOB_WORKER_COUNT: usize = 4;

/// Sleep between polls when the queue is empty (milliseconds).
pub const JOB_IDLE_BACKOFF_MS: u64 = 500;

/// Sleep after a job store error before polling again (milliseconds).
pub const JOB_STORE_ERROR_BACKOFF_MS: u64 = 1000;

/// Per-job handler timeout (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// How long a fetched job stays hidden from other workers (seconds).
/// Must exceed `JOB_TIMEOUT_SECS` so a live worker never loses its claim.
pub const JOB_CLAIM_LEASE_SECS: u64 = JOB_TIMEOUT_SECS + 60;

/// Base retry delay for attempt counts of zero or less (seconds).
pub const JOB_RETRY_BASE_SECS: u64 = 1;

/// Upper bound on the exponential retry delay (seconds).
pub const JOB_RETRY_MAX_SECS: u64 = 300;

/// Broadcast channel capacity for worker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OLLAMA CLIENT
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Per-attempt request timeout (seconds).
pub const OLLAMA_TIMEOUT_SECS: u64 = 30;

/// Additional attempts after the first failure.
pub const OLLAMA_RETRIES: u32 = 3;

/// Linear backoff unit between attempts (milliseconds).
pub const OLLAMA_BACKOFF_MS: u64 = 500;

/// Consecutive failures that open the circuit.
pub const OLLAMA_CIRCUIT_THRESHOLD: u32 = 5;

/// How long the circuit stays open (seconds).
pub const OLLAMA_CIRCUIT_RESET_SECS: u64 = 30;

/// Models the deployment expects to find on the server.
pub const OLLAMA_MODELS: &[&str] = &["deepseek-r1:32b", "llama3"];

// =============================================================================
// INFERENCE ENGINE
// =============================================================================

/// Generation model used for activity analysis.
pub const GEN_MODEL: &str = "llama3";

/// Prompt template name for activity analysis.
pub const TEMPLATE_NAME: &str = "activity";

/// Prompt template version loaded at startup.
pub const TEMPLATE_VERSION: &str = "v1";

/// Deadline for one full analyze call (seconds).
pub const ANALYZE_TIMEOUT_SECS: u64 = 20;

/// Confidence below this is logged as low.
pub const MIN_CONFIDENCE: f64 = 0.5;

// =============================================================================
// CONTEXT DOCUMENTS
// =============================================================================

/// Longest accepted entity name, in characters.
pub const ENTITY_NAME_MAX_CHARS: usize = 255;

/// Merge attempts against a moving context version before giving up.
pub const CONTEXT_WRITE_MAX_ATTEMPTS: u32 = 5;

/// Reserved key holding merge bookkeeping.
pub const META_KEY: &str = "_meta";

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Connection acquire timeout (seconds).
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout (seconds).
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

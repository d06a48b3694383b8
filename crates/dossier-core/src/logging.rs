//! Structured logging schema and field name constants for dossier.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query them uniformly across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Requires operator attention (no handler, store failure) |
//! | WARN  | Recoverable issue (retry scheduled, low confidence, circuit opened) |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "database", "inference", "jobs", "context"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "ollama", "breaker", "catalog", "engine", "worker", "processor"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "generate", "reload", "analyze_activity", "fetch_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type tag.
pub const JOB_TYPE: &str = "job_type";

/// Index of the poll loop within the pool.
pub const WORKER_ID: &str = "worker_id";

/// Engineer whose context is affected.
pub const ENGINEER_ID: &str = "engineer_id";

/// Context document version.
pub const VERSION: &str = "version";

/// Schema version used for validation.
pub const SCHEMA_VERSION: &str = "schema_version";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt counter (job attempts or client attempts).
pub const ATTEMPT: &str = "attempt";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Confidence attached to an analysis.
pub const CONFIDENCE: &str = "confidence";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_distinct() {
        let names = [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            JOB_ID,
            JOB_TYPE,
            WORKER_ID,
            ENGINEER_ID,
            VERSION,
            SCHEMA_VERSION,
            DURATION_MS,
            ATTEMPT,
            PROMPT_LEN,
            RESPONSE_LEN,
            MODEL,
            CONFIDENCE,
            ERROR_MSG,
            SLOW,
        ];
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}

//! Error types for dossier.

use thiserror::Error;

/// Result type alias using dossier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dossier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inference backend returned an error or an unusable reply
    #[error("Inference error: {0}")]
    Inference(String),

    /// The model client's circuit breaker is open; no request was sent.
    #[error("ollama circuit open")]
    CircuitOpen,

    /// No inference backend is attached to the engine.
    #[error("inference engine is in degraded mode: no backend attached")]
    Degraded,

    /// Every generation attempt failed; `source` is the last cause.
    #[error("generate failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Model output could not be turned into a response
    #[error("Parse error: {0}")]
    Parse(String),

    /// No compiled schema is cached for the requested version
    #[error("no schema found for version {0}")]
    SchemaNotFound(String),

    /// Response failed JSON Schema validation
    #[error("response does not match schema: {0}")]
    SchemaValidation(String),

    /// Prompt template missing or failed to render
    #[error("Template error: {0}")]
    Template(String),

    /// Operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A conditional context write lost to a concurrent writer
    #[error("context version conflict for engineer {engineer_id}: expected {expected}, found {actual}")]
    VersionConflict {
        engineer_id: i64,
        expected: i32,
        actual: i32,
    },

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the fail-fast sentinel returned while the breaker is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen)
    }

    /// True when the engine had no backend to call.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Error::Degraded)
    }

    /// True when a conditional context write saw a newer version.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    /// True when the backend was never contacted (breaker open or degraded).
    pub fn is_backend_unavailable(&self) -> bool {
        self.is_circuit_open() || self.is_degraded()
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("history entry 7".to_string());
        assert_eq!(err.to_string(), "Not found: history entry 7");
    }

    #[test]
    fn test_circuit_open_display() {
        assert_eq!(Error::CircuitOpen.to_string(), "ollama circuit open");
    }

    #[test]
    fn test_schema_errors_display() {
        let err = Error::SchemaNotFound("v9".to_string());
        assert_eq!(err.to_string(), "no schema found for version v9");

        let err = Error::SchemaValidation("missing summary; ".to_string());
        assert!(err.to_string().starts_with("response does not match schema"));
    }

    #[test]
    fn test_retries_exhausted_keeps_last_cause() {
        let err = Error::RetriesExhausted {
            attempts: 4,
            source: Box::new(Error::Inference("Ollama returned 500".to_string())),
        };
        assert!(err.to_string().contains("after 4 attempts"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Inference error: Ollama returned 500");
    }

    #[test]
    fn test_backend_unavailable_predicates() {
        assert!(Error::CircuitOpen.is_circuit_open());
        assert!(!Error::CircuitOpen.is_degraded());
        assert!(Error::Degraded.is_degraded());
        assert!(Error::Degraded.is_backend_unavailable());
        let conflict = Error::VersionConflict {
            engineer_id: 1,
            expected: 2,
            actual: 3,
        };
        assert!(conflict.is_version_conflict());
        assert!(!Error::Degraded.is_version_conflict());
        assert!(Error::CircuitOpen.is_backend_unavailable());
        assert!(!Error::Inference("boom".into()).is_backend_unavailable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}

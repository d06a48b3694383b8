//! # dossier-jobs
//!
//! Background processing for the dossier pipeline.
//!
//! This crate provides:
//! - A pool of polling workers over any [`JobRepository`]
//! - Exponential retry with dead-lettering
//! - Progress notifications via broadcast channels
//! - The `ai.analyze_activity` and `ai.process_response` handlers
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dossier_jobs::{AnalyzeActivityHandler, ProcessResponseHandler, ResponseProcessor,
//!     WorkerBuilder, WorkerConfig};
//!
//! let config = WorkerConfig::from_env();
//! let db = dossier_db::Database::connect_for_workers(&database_url, config.worker_count).await?;
//! let processor = Arc::new(ResponseProcessor::new(db.contexts.clone(), db.questions.clone()));
//! let worker = WorkerBuilder::new(db.jobs.clone())
//!     .with_config(config)
//!     .with_handler(AnalyzeActivityHandler::new(engine, db.contexts.clone(), db.jobs.clone()))
//!     .with_handler(ProcessResponseHandler::new(processor))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod analyze_handler;
pub mod handler;
pub mod process_handler;
pub mod processor;
pub mod retry;
pub mod worker;

// Re-export core types
pub use dossier_core::*;

pub use analyze_handler::{AnalyzeActivityHandler, AnalyzeActivityPayload};
pub use handler::{JobContext, JobHandler, JobResult};
pub use process_handler::{ProcessResponseHandler, ProcessResponsePayload};
pub use processor::{conflict_question, ProcessOutcome, ResponseProcessor, RollbackOutcome};
pub use retry::{backoff_duration, record_failure, record_success, FailureOutcome};
pub use worker::{enqueue_json, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

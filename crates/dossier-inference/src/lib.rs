//! # dossier-inference
//!
//! Model access and response interpretation for dossier.
//!
//! This crate provides:
//! - A resilient Ollama client (per-call timeout, linear retry, circuit breaker)
//! - A snapshot cache of response schemas and the active prompt template
//! - A tolerant parser and a completeness-based confidence score
//! - The inference engine, with a hot-swappable backend and degraded mode
//!
//! # Feature Flags
//!
//! - `mock`: expose [`mock`] for tests in dependent crates
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dossier_inference::{EngineConfig, InferenceEngine, OllamaClient, PromptCatalog};
//! # async fn run(
//! #     schemas: Arc<dyn dossier_core::SchemaRepository>,
//! #     templates: Arc<dyn dossier_core::TemplateRepository>,
//! # ) -> dossier_core::Result<()> {
//! let config = EngineConfig::from_env();
//! let catalog = PromptCatalog::load(
//!     schemas,
//!     templates,
//!     config.template_name.clone(),
//!     config.template_version.clone(),
//! )
//! .await?;
//! let client = Arc::new(OllamaClient::from_env()?);
//! let engine = InferenceEngine::with_backend(Arc::new(catalog), config, client);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod ollama;
pub mod parser;
pub mod template;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use breaker::{BreakerState, CircuitBreaker, Permit};
pub use catalog::{ActiveTemplate, CatalogSnapshot, CompiledSchema, PromptCatalog};
pub use config::{EngineConfig, OllamaConfig};
pub use engine::InferenceEngine;
pub use ollama::OllamaClient;
pub use parser::{assess_confidence, extract_json, parse_ai_response};
pub use template::PromptText;

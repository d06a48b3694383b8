//! Activity analysis: render, generate, parse, validate, score.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use dossier_core::{AIResponse, Activity, Error, GenerationBackend, Result};

use crate::catalog::PromptCatalog;
use crate::config::EngineConfig;
use crate::parser::{assess_confidence, extract_json, parse_ai_response};

/// Orchestrates one analysis per activity.
///
/// The backend sits behind a read/write lock. A call captures the current
/// backend once and keeps it for its whole duration, so attaching or
/// detaching never interrupts an analysis in flight.
pub struct InferenceEngine {
    backend: RwLock<Option<Arc<dyn GenerationBackend>>>,
    catalog: Arc<PromptCatalog>,
    config: EngineConfig,
}

impl InferenceEngine {
    /// Create an engine with no backend attached (degraded).
    pub fn new(catalog: Arc<PromptCatalog>, config: EngineConfig) -> Self {
        Self {
            backend: RwLock::new(None),
            catalog,
            config,
        }
    }

    /// Create an engine with `backend` attached.
    pub fn with_backend(
        catalog: Arc<PromptCatalog>,
        config: EngineConfig,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            backend: RwLock::new(Some(backend)),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<PromptCatalog> {
        &self.catalog
    }

    /// Swap in a backend, returning the previous one.
    pub async fn attach_backend(
        &self,
        backend: Arc<dyn GenerationBackend>,
    ) -> Option<Arc<dyn GenerationBackend>> {
        let previous = self.backend.write().await.replace(backend);
        info!(
            subsystem = "inference",
            component = "engine",
            replaced = previous.is_some(),
            "Inference backend attached"
        );
        previous
    }

    /// Clear the backend; later calls fail with [`Error::Degraded`].
    pub async fn detach_backend(&self) -> Option<Arc<dyn GenerationBackend>> {
        let previous = self.backend.write().await.take();
        if previous.is_some() {
            warn!(
                subsystem = "inference",
                component = "engine",
                "Inference backend detached, entering degraded mode"
            );
        }
        previous
    }

    pub async fn backend(&self) -> Option<Arc<dyn GenerationBackend>> {
        self.backend.read().await.clone()
    }

    pub async fn is_degraded(&self) -> bool {
        self.backend.read().await.is_none()
    }

    /// Reload schemas and the prompt template.
    pub async fn reload_catalog(&self) -> Result<()> {
        self.catalog.reload().await
    }

    /// Analyze one activity against the engineer's current context.
    ///
    /// The whole call is bounded by the configured timeout. Low confidence is
    /// logged, never an error.
    #[instrument(skip(self, activity, context_text), fields(subsystem = "inference", component = "engine", op = "analyze_activity", engineer_id = activity.engineer_id))]
    pub async fn analyze_activity(
        &self,
        activity: &Activity,
        context_text: &str,
    ) -> Result<AIResponse> {
        let start = Instant::now();
        let response = tokio::time::timeout(
            self.config.timeout,
            self.analyze_inner(activity, context_text),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "analysis exceeded {}ms",
                self.config.timeout.as_millis()
            ))
        })??;

        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            confidence = response.confidence,
            "Activity analyzed"
        );
        Ok(response)
    }

    async fn analyze_inner(&self, activity: &Activity, context_text: &str) -> Result<AIResponse> {
        let template = self.catalog.template().await;

        let mut vars = HashMap::new();
        vars.insert("activity", activity.text.clone());
        vars.insert("context", context_text.to_string());
        vars.insert("engineer_id", activity.engineer_id.to_string());
        vars.insert(
            "activity_id",
            activity.id.map(|id| id.to_string()).unwrap_or_default(),
        );
        let prompt = template.text.render(&vars)?;

        let backend = self.backend().await.ok_or(Error::Degraded)?;

        let generation = backend.generate(&self.config.model, &prompt).await?;
        let text = generation.text;

        let mut response = match parse_ai_response(&text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, raw = %text, "Model output could not be parsed");
                return Err(e);
            }
        };
        if response.version.is_empty() {
            response.version = template.version.clone();
        }

        let schema_version = template
            .schema_version
            .clone()
            .unwrap_or_else(|| response.version.clone());
        let schema = self.catalog.schema(&schema_version).await?;
        let instance: JsonValue = extract_json(&text)
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Error::Parse(format!("json unmarshal: {}", e)))?
            .ok_or_else(|| Error::Parse("no JSON object found in response".to_string()))?;
        schema.validate(&instance)?;

        let confidence = match response.confidence {
            Some(c) => c,
            None => {
                let c = assess_confidence(&response);
                response.confidence = Some(c);
                c
            }
        };
        if confidence < self.config.min_confidence {
            warn!(
                confidence,
                min_confidence = self.config.min_confidence,
                activity_id = ?activity.id,
                "Low confidence analysis"
            );
        }

        response.raw = text;
        Ok(response)
    }
}

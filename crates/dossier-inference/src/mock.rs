//! Scripted generation backend and in-memory prompt store for tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dossier_inference::mock::MockBackend;
//!
//! let backend = MockBackend::new()
//!     .with_response(r#"{"summary":"s","entities":{}}"#)
//!     .with_error(dossier_core::Error::Inference("boom".into()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use dossier_core::{
    Error, Generation, GenerationBackend, GenerationMeta, ModelInfo, PromptTemplate, Result,
    SchemaRecord, SchemaRepository, TemplateRepository,
};

/// Prompt template used by [`MockPromptStore::with_defaults`].
pub const DEFAULT_TEMPLATE: &str = "You maintain the work context of engineer {{ engineer_id }}.\n\
Current context:\n{{ context }}\n\n\
New activity ({{ activity_id }}):\n{{ activity }}\n\n\
Reply with one JSON object with keys version, summary, entities (people, projects, technologies), \
confidence, context_update, reasoning.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Result<String>>,
    prompts: Vec<String>,
    health_failures: u32,
}

/// Generation backend that replays scripted replies in order.
///
/// Once the script is exhausted every call returns the fallback response.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    fallback: Arc<String>,
    models: Arc<Vec<ModelInfo>>,
    latency: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            fallback: Arc::new(
                r#"{"version":"v1","summary":"Mock response","entities":{},"reasoning":"mock"}"#
                    .to_string(),
            ),
            models: Arc::new(vec![ModelInfo {
                name: "llama3".to_string(),
                size: None,
                modified_at: None,
            }]),
            latency: Duration::ZERO,
        }
    }

    /// Queue a successful reply.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        lock(&self.state).script.push_back(Ok(text.into()));
        self
    }

    /// Queue a failed reply.
    pub fn with_error(self, error: Error) -> Self {
        lock(&self.state).script.push_back(Err(error));
        self
    }

    /// Reply used after the script runs out.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Arc::new(text.into());
        self
    }

    pub fn with_models(mut self, names: &[&str]) -> Self {
        self.models = Arc::new(
            names
                .iter()
                .map(|name| ModelInfo {
                    name: name.to_string(),
                    size: None,
                    modified_at: None,
                })
                .collect(),
        );
        self
    }

    /// Delay every generation (respects paused tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `n` health checks.
    pub fn fail_health(&self, n: u32) {
        lock(&self.state).health_failures = n;
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.state).prompts.clone()
    }

    pub fn generate_call_count(&self) -> usize {
        lock(&self.state).prompts.len()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation> {
        let next = {
            let mut state = lock(&self.state);
            state.prompts.push(prompt.to_string());
            state.script.pop_front()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let text = match next {
            Some(reply) => reply?,
            None => self.fallback.as_ref().clone(),
        };
        Ok(Generation {
            text,
            meta: GenerationMeta {
                model: model.to_string(),
                latency_ms: self.latency.as_millis() as u64,
                prompt_eval_count: None,
                eval_count: None,
            },
        })
    }

    async fn health(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.health_failures > 0 {
            state.health_failures -= 1;
            return Err(Error::Inference("mock health failure".to_string()));
        }
        if self.models.is_empty() {
            return Err(Error::Inference(
                "health check failed: no models returned".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.models.as_ref().clone())
    }
}

/// In-memory schema and template store.
#[derive(Debug, Default)]
pub struct MockPromptStore {
    schemas: Mutex<Vec<SchemaRecord>>,
    templates: Mutex<HashMap<(String, String), PromptTemplate>>,
}

impl MockPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema `v1` plus template `activity:v1`.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.put_schema("v1", default_schema());
        store.put_template(PromptTemplate {
            name: "activity".to_string(),
            version: "v1".to_string(),
            text: DEFAULT_TEMPLATE.to_string(),
            schema_version: None,
        });
        store
    }

    pub fn put_schema(&self, version: &str, schema: serde_json::Value) {
        let mut schemas = lock(&self.schemas);
        schemas.retain(|s| s.version != version);
        schemas.push(SchemaRecord {
            version: version.to_string(),
            schema,
        });
    }

    pub fn remove_schema(&self, version: &str) {
        lock(&self.schemas).retain(|s| s.version != version);
    }

    pub fn put_template(&self, template: PromptTemplate) {
        lock(&self.templates).insert(
            (template.name.clone(), template.version.clone()),
            template,
        );
    }
}

#[async_trait]
impl SchemaRepository for MockPromptStore {
    async fn list_all(&self) -> Result<Vec<SchemaRecord>> {
        Ok(lock(&self.schemas).clone())
    }
}

#[async_trait]
impl TemplateRepository for MockPromptStore {
    async fn get_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PromptTemplate>> {
        Ok(lock(&self.templates)
            .get(&(name.to_string(), version.to_string()))
            .cloned())
    }
}

/// Response schema used by [`MockPromptStore::with_defaults`].
pub fn default_schema() -> serde_json::Value {
    let names = json!({"type": ["array", "null"], "items": {"type": "string"}});
    json!({
        "type": "object",
        "required": ["summary", "entities"],
        "properties": {
            "version": {"type": "string"},
            "summary": {"type": "string"},
            "entities": {
                "type": "object",
                "properties": {
                    "people": names,
                    "projects": names,
                    "technologies": names
                }
            },
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "context_update": {"type": "boolean"},
            "reasoning": {"type": "string"}
        }
    })
}

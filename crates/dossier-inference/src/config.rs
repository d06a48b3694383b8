//! Environment-driven configuration for the model client and engine.

use std::time::Duration;

use dossier_core::defaults;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Configuration for [`OllamaClient`](crate::OllamaClient).
#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    /// Server base URL, without a trailing slash.
    pub base_url: String,
    /// Bound on each individual request.
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Linear backoff unit; attempt `n` waits `backoff * n`.
    pub backoff: Duration,
    /// Consecutive failures that open the circuit.
    pub circuit_threshold: u32,
    /// How long the circuit stays open before a trial call.
    pub circuit_reset: Duration,
    /// Models the deployment expects to be present.
    pub models: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OLLAMA_URL.to_string(),
            timeout: Duration::from_secs(defaults::OLLAMA_TIMEOUT_SECS),
            retries: defaults::OLLAMA_RETRIES,
            backoff: Duration::from_millis(defaults::OLLAMA_BACKOFF_MS),
            circuit_threshold: defaults::OLLAMA_CIRCUIT_THRESHOLD,
            circuit_reset: Duration::from_secs(defaults::OLLAMA_CIRCUIT_RESET_SECS),
            models: defaults::OLLAMA_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl OllamaConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `OLLAMA_BASE` | `http://127.0.0.1:11434` | Server URL |
    /// | `OLLAMA_TIMEOUT_SECS` | `30` | Per-request timeout |
    /// | `OLLAMA_RETRIES` | `3` | Extra attempts after the first failure |
    /// | `OLLAMA_BACKOFF_MS` | `500` | Linear backoff unit |
    /// | `OLLAMA_CIRCUIT_THRESHOLD` | `5` | Failures that open the circuit |
    /// | `OLLAMA_CIRCUIT_RESET_SECS` | `30` | Open duration |
    /// | `OLLAMA_MODELS` | `deepseek-r1:32b,llama3` | Comma-separated model list |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: env_string("OLLAMA_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(base.base_url),
            timeout: env_parse::<u64>("OLLAMA_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
            retries: env_parse("OLLAMA_RETRIES").unwrap_or(base.retries),
            backoff: env_parse::<u64>("OLLAMA_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.backoff),
            circuit_threshold: env_parse::<u32>("OLLAMA_CIRCUIT_THRESHOLD")
                .filter(|t| *t > 0)
                .unwrap_or(base.circuit_threshold),
            circuit_reset: env_parse::<u64>("OLLAMA_CIRCUIT_RESET_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.circuit_reset),
            models: env_string("OLLAMA_MODELS")
                .map(|v| {
                    v.split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect()
                })
                .unwrap_or(base.models),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// A threshold of 0 is treated as 1.
    pub fn with_circuit(mut self, threshold: u32, reset: Duration) -> Self {
        self.circuit_threshold = threshold.max(1);
        self.circuit_reset = reset;
        self
    }
}

/// Configuration for [`InferenceEngine`](crate::InferenceEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Generation model name.
    pub model: String,
    /// Prompt template name.
    pub template_name: String,
    /// Prompt template version.
    pub template_version: String,
    /// Deadline for one full analyze call.
    pub timeout: Duration,
    /// Confidence below this is logged as low.
    pub min_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: defaults::GEN_MODEL.to_string(),
            template_name: defaults::TEMPLATE_NAME.to_string(),
            template_version: defaults::TEMPLATE_VERSION.to_string(),
            timeout: Duration::from_secs(defaults::ANALYZE_TIMEOUT_SECS),
            min_confidence: defaults::MIN_CONFIDENCE,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DOSSIER_GEN_MODEL` | `llama3` | Generation model |
    /// | `DOSSIER_TEMPLATE_NAME` | `activity` | Prompt template name |
    /// | `DOSSIER_TEMPLATE_VERSION` | `v1` | Prompt template version |
    /// | `DOSSIER_ANALYZE_TIMEOUT_SECS` | `20` | Analyze deadline |
    /// | `DOSSIER_MIN_CONFIDENCE` | `0.5` | Low-confidence threshold |
    ///
    /// Non-positive numbers fall back to the defaults.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            model: env_string("DOSSIER_GEN_MODEL").unwrap_or(base.model),
            template_name: env_string("DOSSIER_TEMPLATE_NAME").unwrap_or(base.template_name),
            template_version: env_string("DOSSIER_TEMPLATE_VERSION")
                .unwrap_or(base.template_version),
            timeout: env_parse::<u64>("DOSSIER_ANALYZE_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
            min_confidence: env_parse::<f64>("DOSSIER_MIN_CONFIDENCE")
                .filter(|c| *c > 0.0)
                .unwrap_or(base.min_confidence),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.template_name = name.into();
        self.template_version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }
}

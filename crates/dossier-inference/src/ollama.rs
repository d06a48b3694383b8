//! Resilient Ollama client: per-call timeout, linear retry, circuit breaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use dossier_core::{Error, Generation, GenerationBackend, GenerationMeta, ModelInfo, Result};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::OllamaConfig;

/// Generation slower than this is logged as slow (milliseconds).
const SLOW_GENERATION_MS: u64 = 30_000;

/// Ollama client shared by every worker.
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
    breaker: CircuitBreaker,
    closed: AtomicBool,
}

impl OllamaClient {
    /// Create a client; fails on an unparsable base URL.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid base url {}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            base_url = %config.base_url,
            timeout_ms = config.timeout.as_millis() as u64,
            retries = config.retries,
            "Initializing Ollama client"
        );

        Ok(Self {
            client,
            breaker: CircuitBreaker::new(config.circuit_threshold, config.circuit_reset),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OllamaConfig::from_env())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Stop accepting calls. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(subsystem = "inference", component = "ollama", "Ollama client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Config("ollama client is closed".to_string()));
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// One generation request with no retry.
    async fn generate_once(&self, model: &str, prompt: &str) -> Result<Generation> {
        let start = Instant::now();
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("generate request timed out: {}", e))
                } else {
                    Error::Inference(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Inference(format!("Failed to read response: {}", e)))?;
        let mut generation = parse_generate_body(&body, model)?;
        generation.meta.latency_ms = start.elapsed().as_millis() as u64;
        Ok(generation)
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Inference(format!(
                "models endpoint returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse model list: {}", e)))?;
        Ok(tags.models)
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "ollama", op = "generate", model = %model, prompt_len = prompt.len()))]
    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation> {
        self.ensure_open()?;

        let attempts = self.config.retries + 1;
        let mut last_error = Error::Internal("no generation attempt made".to_string());

        for attempt in 0..attempts {
            let permit = self.breaker.acquire()?;

            match self.generate_once(model, prompt).await {
                Ok(generation) => {
                    permit.success();
                    debug!(
                        attempt,
                        response_len = generation.text.len(),
                        duration_ms = generation.meta.latency_ms,
                        "Generation complete"
                    );
                    if generation.meta.latency_ms > SLOW_GENERATION_MS {
                        warn!(
                            duration_ms = generation.meta.latency_ms,
                            slow = true,
                            "Slow generation operation"
                        );
                    }
                    return Ok(generation);
                }
                Err(e) => {
                    permit.failure();
                    warn!(attempt, error = %e, "Generation attempt failed");
                    last_error = e;
                }
            }

            if self.breaker.is_open() {
                return Err(Error::CircuitOpen);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.backoff * (attempt + 1)).await;
            }
        }

        Err(Error::RetriesExhausted {
            attempts,
            source: Box::new(last_error),
        })
    }

    #[instrument(skip(self), fields(subsystem = "inference", component = "ollama", op = "health"))]
    async fn health(&self) -> Result<()> {
        self.ensure_open()?;
        let permit = self.breaker.acquire()?;

        match self.fetch_models().await {
            Ok(models) if models.is_empty() => {
                permit.failure();
                warn!("Ollama health check failed: no models returned");
                Err(Error::Inference(
                    "health check failed: no models returned".to_string(),
                ))
            }
            Ok(models) => {
                permit.success();
                let missing: Vec<&str> = self
                    .config
                    .models
                    .iter()
                    .filter(|want| !models.iter().any(|m| &m.name == *want))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    warn!(?missing, "Configured models not present on server");
                }
                debug!(model_count = models.len(), "Ollama health check passed");
                Ok(())
            }
            Err(e) => {
                permit.failure();
                warn!(error = %e, "Ollama health check failed");
                Err(Error::Inference(format!("health check failed: {}", e)))
            }
        }
    }

    #[instrument(skip(self), fields(subsystem = "inference", component = "ollama", op = "list_models"))]
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.ensure_open()?;
        let permit = self.breaker.acquire()?;

        match self.fetch_models().await {
            Ok(models) => {
                permit.success();
                Ok(models)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }
}

/// Request payload for the Ollama `/api/generate` endpoint.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One object from `/api/generate`; streamed replies send many.
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Accepts a single JSON object or newline-delimited chunks.
fn parse_generate_body(body: &str, model: &str) -> Result<Generation> {
    let mut text = String::new();
    let mut meta = GenerationMeta {
        model: model.to_string(),
        latency_ms: 0,
        prompt_eval_count: None,
        eval_count: None,
    };
    let mut chunks = 0usize;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;
        if let Some(err) = chunk.error {
            return Err(Error::Inference(format!("Ollama error: {}", err)));
        }
        text.push_str(&chunk.response);
        meta.prompt_eval_count = chunk.prompt_eval_count.or(meta.prompt_eval_count);
        meta.eval_count = chunk.eval_count.or(meta.eval_count);
        chunks += 1;
    }

    if chunks == 0 {
        return Err(Error::Inference("empty response body".to_string()));
    }
    Ok(Generation { text, meta })
}

//! Concrete [`ModelProvider`] backends and provider selection.
//!
//! - **[`OpenAIProvider`]**: chat completions and embeddings over the OpenAI
//!   API. Requires `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]**: `/api/generate` and `/api/embed` on a local
//!   Ollama instance. Available only when the model for the requested
//!   capability is installed.
//! - **`LocalProvider`**: offline sentence embeddings via fastembed
//!   (feature `local-embeddings-fastembed`). Embedding only.
//!
//! # Selection
//!
//! [`select_provider`] walks the configured `[[providers]]` list in order
//! and returns the first backend that can be constructed, supports the
//! requested [`Capability`], and passes its probe. When none qualifies the
//! result is [`Error::ProviderUnavailable`] listing every reason.
//!
//! # Retry Strategy
//!
//! HTTP backends retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - client timeout → [`Error::ProviderTimeout`], no retry
//! - backoff: 1s, 2s, 4s, ... capped at 32s

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub use refinery_core::provider::Capability;
use refinery_core::provider::{Generation, ModelProvider};
use refinery_core::{Error, Result};

use crate::config::ProviderConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// HTTP client and retry policy shared by one backend's calls.
struct HttpBackend {
    label: &'static str,
    client: reqwest::Client,
    max_retries: u32,
    timeout: Duration,
}

impl HttpBackend {
    fn new(label: &'static str, config: &ProviderConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Provider(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            label,
            client,
            max_retries: config.max_retries,
            timeout,
        })
    }

    fn timed_out(&self, operation: &'static str) -> Error {
        Error::ProviderTimeout {
            operation,
            timeout: self.timeout,
        }
    }

    /// POST `body` to `url`, retrying transient failures, and decode the
    /// JSON response. A request that hits the client timeout is reported
    /// as [`Error::ProviderTimeout`] without retrying.
    async fn post_json(
        &self,
        operation: &'static str,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<Value> {
        let backend = self.label;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(backend, operation, attempt, ?delay, "retrying provider call");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(key) = bearer {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            if e.is_timeout() {
                                self.timed_out(operation)
                            } else {
                                Error::Provider(format!("{} returned invalid JSON: {}", backend, e))
                            }
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err =
                        Error::Provider(format!("{} API error {}: {}", backend, status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    warn!(backend, operation, timeout = ?self.timeout, "provider call timed out");
                    return Err(self.timed_out(operation));
                }
                Err(e) => {
                    last_err = Some(Error::Provider(format!(
                        "{} connection error ({}): {}",
                        backend, url, e
                    )));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Provider(format!("{} call failed after retries", backend))))
    }
}

fn parse_vector(value: &Value, what: &str) -> Result<Vec<f32>> {
    let array = value
        .as_array()
        .ok_or_else(|| Error::Provider(format!("invalid {} response: embedding is not an array", what)))?;
    array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                Error::Provider(format!(
                    "invalid {} response: embedding entry {} is not a number",
                    what, i
                ))
            })
        })
        .collect()
}

// ============ OpenAI ============

pub struct OpenAIProvider {
    http: HttpBackend,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OpenAIProvider {
    /// Fails with [`Error::ProviderUnavailable`] when `OPENAI_API_KEY` is
    /// not set.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::ProviderUnavailable("OPENAI_API_KEY environment variable not set".to_string())
            })?;

        Ok(Self {
            http: HttpBackend::new("OpenAI", config)?,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: config
                .embedding_model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let url = format!("{}/chat/completions", self.base_url);
        let json = self
            .http
            .post_json("generate", &url, Some(&self.api_key), &body)
            .await?;
        parse_openai_completion(&json).map(Generation::Text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });
        let url = format!("{}/embeddings", self.base_url);
        let json = self
            .http
            .post_json("embed", &url, Some(&self.api_key), &body)
            .await?;
        parse_openai_embedding(&json)
    }
}

fn parse_openai_completion(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Provider("invalid OpenAI response: missing message content".to_string()))
}

fn parse_openai_embedding(json: &Value) -> Result<Vec<f32>> {
    let embedding = json
        .pointer("/data/0/embedding")
        .ok_or_else(|| Error::Provider("invalid OpenAI response: missing data array".to_string()))?;
    parse_vector(embedding, "OpenAI")
}

// ============ Ollama ============

pub struct OllamaProvider {
    http: HttpBackend,
    url: String,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: HttpBackend::new("Ollama", config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| "gemma3:4b".to_string()),
            embedding_model: config
                .embedding_model
                .clone()
                .unwrap_or_else(|| "nomic-embed-text:137m-v1.5-fp16".to_string()),
        })
    }

    /// Names reported by `GET /api/tags`.
    pub async fn installed_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| {
                Error::ProviderUnavailable(format!("Ollama not reachable at {}: {}", self.url, e))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::ProviderUnavailable(format!(
                "Ollama tags request failed with {}: {}",
                status, body_text
            )));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid Ollama tags response: {}", e)))?;
        Ok(parse_ollama_tags(&json))
    }
}

fn parse_ollama_tags(json: &Value) -> Vec<String> {
    json.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// `llama3` matches an installed `llama3:latest`.
fn is_installed(installed: &[String], model: &str) -> bool {
    installed
        .iter()
        .any(|name| name == model || *name == format!("{}:latest", model))
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.url);
        let json = self.http.post_json("generate", &url, None, &body).await?;
        Ok(Generation::Structured(json))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });
        let url = format!("{}/api/embed", self.url);
        let json = self.http.post_json("embed", &url, None, &body).await?;
        let first = json
            .pointer("/embeddings/0")
            .ok_or_else(|| Error::Provider("invalid Ollama response: missing embeddings array".to_string()))?;
        parse_vector(first, "Ollama")
    }

    async fn probe(&self, capability: Capability) -> Result<()> {
        let installed = self.installed_models().await?;
        let model = match capability {
            Capability::Generate => &self.model,
            Capability::Embed => &self.embedding_model,
        };
        if !is_installed(&installed, model) {
            return Err(Error::ProviderUnavailable(format!(
                "Ollama model '{}' is not installed. Run `ollama pull {}` or pick one of {:?}",
                model, model, installed
            )));
        }
        Ok(())
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let model_name = config
            .embedding_model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Reject unknown names at selection time, not on first embed.
        fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(Error::ProviderUnavailable(format!(
            "unknown local embedding model '{}'; supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl ModelProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, _prompt: &str) -> Result<Generation> {
        Err(refinery_core::provider::unsupported("local", "generation"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let slot = self.model.clone();
        let name = self.model_name.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| Error::Provider("local embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model(&name)?)
                        .with_show_download_progress(false),
                )
                .map_err(|e| {
                    Error::ProviderUnavailable(format!(
                        "failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::Provider("local embedding model missing".to_string()))?;
            let mut vectors = model
                .embed(vec![text], None)
                .map_err(|e| Error::Provider(format!("local embedding failed: {}", e)))?;
            vectors
                .pop()
                .ok_or_else(|| Error::Provider("local embedding returned nothing".to_string()))
        })
        .await
        .map_err(|e| Error::Provider(format!("local embedding task failed: {}", e)))?
    }
}

// ============ Selection ============

/// Build the backend named by `config.kind`.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>> {
    match config.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::ProviderUnavailable(
            "local provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(Error::ProviderUnavailable(format!(
            "unknown provider kind: {}",
            other
        ))),
    }
}

fn kind_supports(kind: &str, capability: Capability) -> bool {
    !(kind == "local" && capability == Capability::Generate)
}

/// First configured provider that supports `capability` and is available.
pub async fn select_provider(
    configs: &[ProviderConfig],
    capability: Capability,
) -> Result<Arc<dyn ModelProvider>> {
    let candidates = configs
        .iter()
        .filter(|c| kind_supports(&c.kind, capability))
        .map(|c| (c.kind.clone(), create_provider(c)))
        .collect();
    first_available(candidates, capability).await
}

/// Probe candidates in order and return the first that answers.
pub async fn first_available(
    candidates: Vec<(String, Result<Arc<dyn ModelProvider>>)>,
    capability: Capability,
) -> Result<Arc<dyn ModelProvider>> {
    let mut reasons = Vec::new();

    for (kind, candidate) in candidates {
        let provider = match candidate {
            Ok(p) => p,
            Err(e) => {
                debug!(kind = %kind, error = %e, "provider skipped");
                reasons.push(format!("{}: {}", kind, e));
                continue;
            }
        };
        match provider.probe(capability).await {
            Ok(()) => {
                info!(
                    provider = provider.name(),
                    model = provider.model_name(),
                    ?capability,
                    "provider selected"
                );
                return Ok(provider);
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "provider probe failed");
                reasons.push(format!("{}: {}", kind, e));
            }
        }
    }

    if reasons.is_empty() {
        reasons.push("no providers configured".to_string());
    }
    Err(Error::ProviderUnavailable(reasons.join("; ")))
}

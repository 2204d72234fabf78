//! Model provider capability interface.
//!
//! Every backend (remote API, local server, embedding-only model) exposes
//! the same two capabilities: [`generate`](ModelProvider::generate) and
//! [`embed`](ModelProvider::embed). Backends that lack one return
//! [`Error::Provider`]. Concrete implementations live in the
//! `doc-refinery` app crate.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Output of a generation call.
///
/// Some backends return bare text, others a structured object whose
/// `response` field carries the text.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Structured(serde_json::Value),
}

impl Generation {
    /// The displayable text, trimmed.
    ///
    /// For structured output this is the `response` field (empty if absent).
    /// Non-string `response` values are rendered as JSON.
    pub fn into_text(self) -> String {
        match self {
            Generation::Text(s) => s.trim().to_string(),
            Generation::Structured(value) => match value.get("response") {
                Some(serde_json::Value::String(s)) => s.trim().to_string(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        }
    }
}

/// What a caller needs a provider for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Generate,
    Embed,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short backend label for logs (e.g. `"openai"`, `"ollama"`).
    fn name(&self) -> &str;

    /// Model identifier used for generation or embedding.
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<Generation>;

    /// Embed `text` into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Whether this backend can serve `capability` right now.
    ///
    /// Used by first-success selection. Defaults to available.
    async fn probe(&self, _capability: Capability) -> Result<()> {
        Ok(())
    }
}

/// Helper for backends without a generation capability.
pub fn unsupported(backend: &str, capability: &str) -> Error {
    Error::Provider(format!("{} backend does not support {}", backend, capability))
}

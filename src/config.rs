//! TOML configuration.
//!
//! Every policy constant the cache and rewrite engine depend on (validity
//! window, upload size limit, similarity threshold, provider timeouts) is
//! read from here and passed explicitly to the component that needs it.
//!
//! ```toml
//! [db]
//! path = "./data/refinery.sqlite"
//!
//! [cache]
//! validity_days = 30
//! max_upload_bytes = 2097152
//! model = "resume-parser.bin"
//!
//! [rewrite]
//! threshold = 0.30
//! timeout_secs = 60
//!
//! [[providers]]
//! kind = "openai"
//! model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//!
//! [[providers]]
//! kind = "ollama"
//! model = "qwen3:8b"
//! embedding_model = "nomic-embed-text:137m-v1.5-fp16"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Parsing model identifier. A path to an existing file is hashed by
    /// content; anything else is hashed as a string.
    #[serde(default = "default_parser_model")]
    pub model: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            validity_days: default_validity_days(),
            max_upload_bytes: default_max_upload_bytes(),
            model: default_parser_model(),
        }
    }
}

impl CacheConfig {
    /// Saturates instead of panicking; `validate` rejects values that
    /// would need it.
    pub fn validity_window(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.validity_days).unwrap_or(chrono::Duration::MAX)
    }
}

fn default_validity_days() -> i64 {
    30
}
fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_parser_model() -> String {
    "resume-parser.bin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RewriteConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RewriteConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_threshold() -> f32 {
    0.30
}
fn default_call_timeout_secs() -> u64 {
    60
}

/// One entry in the ordered provider list.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// `openai`, `ollama`, or `local`.
    pub kind: String,
    /// Generation model.
    #[serde(default)]
    pub model: Option<String>,
    /// Embedding model; falls back to a per-kind default.
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            model: None,
            embedding_model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_http_timeout_secs() -> u64 {
    120
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig::new("openai"), ProviderConfig::new("ollama")]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Defaults for everything, with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            cache: CacheConfig::default(),
            rewrite: RewriteConfig::default(),
            providers: default_providers(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    if config.providers.is_empty() {
        config.providers = default_providers();
    }
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.validity_days <= 0 {
        bail!("cache.validity_days must be > 0");
    }
    if chrono::Duration::try_days(config.cache.validity_days).is_none() {
        bail!(
            "cache.validity_days is out of range: {}",
            config.cache.validity_days
        );
    }
    if config.cache.max_upload_bytes == 0 {
        bail!("cache.max_upload_bytes must be > 0");
    }
    if config.cache.model.trim().is_empty() {
        bail!("cache.model must not be empty");
    }
    if !(0.0..=1.0).contains(&config.rewrite.threshold) {
        bail!("rewrite.threshold must be in [0.0, 1.0]");
    }
    if config.rewrite.timeout_secs == 0 {
        bail!("rewrite.timeout_secs must be > 0");
    }
    for p in &config.providers {
        match p.kind.as_str() {
            "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown provider kind: '{}'. Must be openai, ollama, or local.",
                other
            ),
        }
    }
    Ok(())
}

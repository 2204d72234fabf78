//! Core data models for the ingestion cache.
//!
//! An [`ArtifactRecord`] is the persisted result of parsing one submission
//! under one model. Records are addressed by a [`CacheKey`], the pair of a
//! [`ContentDigest`] (what was submitted) and a [`ModelDigest`] (what
//! interpreted it).

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// SHA-256 digest of a submission's full byte content, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 digest identifying the model used to interpret content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelDigest(String);

impl ModelDigest {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dedup bucket identity. At most one live record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content: ContentDigest,
    pub model: ModelDigest,
}

impl CacheKey {
    pub fn new(content: ContentDigest, model: ModelDigest) -> Self {
        Self { content, model }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefixes keep log lines readable.
        write!(
            f,
            "{}/{}",
            &self.content.as_str()[..self.content.as_str().len().min(12)],
            &self.model.as_str()[..self.model.as_str().len().min(12)]
        )
    }
}

/// One stored, parsed submission.
///
/// Serializes with the field names used on the HTTP boundary
/// (`hash`, `modelHash`, `displayName`, `uploadDt`). The vector is never
/// serialized; it is only read back by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub id: String,
    #[serde(rename = "hash")]
    pub content_hash: ContentDigest,
    #[serde(rename = "modelHash")]
    pub model_hash: ModelDigest,
    pub filename: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "uploadDt")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
}

impl ArtifactRecord {
    /// Builds a fresh record from parse output with a new UUID.
    pub fn create(key: &CacheKey, artifact: NewArtifact, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash: key.content.clone(),
            model_hash: key.model.clone(),
            filename: artifact.filename,
            display_name: artifact.display_name,
            created_at,
            parsed: artifact.parsed,
            vector: artifact.vector,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.content_hash.clone(), self.model_hash.clone())
    }

    /// A record is live iff `now - created_at < window`.
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.created_at) < window
    }
}

/// Output of a successful parse step, before it is keyed and persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewArtifact {
    pub filename: String,
    pub display_name: Option<String>,
    pub parsed: Option<serde_json::Value>,
    pub vector: Option<Vec<f32>>,
}

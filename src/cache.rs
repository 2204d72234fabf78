//! Content-addressed ingestion cache.
//!
//! [`IngestionCache::resolve`] maps a submission to a stored
//! [`ArtifactRecord`], parsing only on a genuine miss:
//!
//! ```text
//!   bytes ──size check──▶ content digest ─┐
//!   model id ──memoized digest───────────┴─▶ CacheKey ──▶ store lookup
//!                                                            │
//!        live ◀─────────────────────────────────────────────┤
//!        (was_cached = true)                                 │ missing / stale
//!                                                            ▼
//!                                               parse ──▶ insert / supersede
//!                                                            │
//!                                 Conflict ──▶ re-read winner (was_cached = true)
//! ```
//!
//! A winner deleted before the re-read gets one more write attempt.
//!
//! No application lock is held anywhere. Concurrent submissions of the same
//! content all parse, and the store's uniqueness constraint picks the one
//! that gets persisted; the others return the winner as a cache hit.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use refinery_core::hash::{digest_reader, model_identifier_digest, ContentHasher, Sha256Hasher};
use refinery_core::models::{ArtifactRecord, CacheKey, ModelDigest, NewArtifact};
use refinery_core::store::ArtifactStore;
use refinery_core::{Error, Result};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;

/// Outcome of [`IngestionCache::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: ArtifactRecord,
    /// `true` when an existing live record answered the submission.
    pub was_cached: bool,
}

/// Memoized model identity digests.
///
/// A model identifier that names an existing file is hashed by the file's
/// bytes (so replacing the model file invalidates cached artifacts);
/// anything else is hashed as a string. Each identifier is hashed once per
/// process.
#[derive(Default)]
pub struct ModelDigestCache {
    memo: RwLock<HashMap<String, ModelDigest>>,
}

impl ModelDigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized digest, if this identifier has been hashed before.
    pub fn cached(&self, identifier: &str) -> Option<ModelDigest> {
        self.memo.read().ok()?.get(identifier).cloned()
    }

    /// Digest for `identifier`, computing and memoizing it on first use.
    ///
    /// May read a model file from disk; call from a blocking context.
    pub fn digest(&self, identifier: &str) -> Result<ModelDigest> {
        if let Some(d) = self.cached(identifier) {
            return Ok(d);
        }

        let path = Path::new(identifier);
        let digest = if path.is_file() {
            let file = std::fs::File::open(path).map_err(|e| {
                Error::ProviderUnavailable(format!("cannot open model file {}: {}", identifier, e))
            })?;
            let hex = digest_reader(std::io::BufReader::new(file)).map_err(|e| {
                Error::ProviderUnavailable(format!("cannot read model file {}: {}", identifier, e))
            })?;
            ModelDigest::from_hex(hex)
        } else {
            model_identifier_digest(identifier)
        };

        if let Ok(mut memo) = self.memo.write() {
            memo.entry(identifier.to_string())
                .or_insert_with(|| digest.clone());
        }
        Ok(digest)
    }
}

/// The dedup cache in front of an [`ArtifactStore`].
pub struct IngestionCache {
    store: Arc<dyn ArtifactStore>,
    hasher: Arc<dyn ContentHasher>,
    models: Arc<ModelDigestCache>,
    clock: Arc<dyn Clock>,
    window: Duration,
    max_bytes: usize,
}

impl IngestionCache {
    pub fn new(store: Arc<dyn ArtifactStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            hasher: Arc::new(Sha256Hasher),
            models: Arc::new(ModelDigestCache::new()),
            clock: Arc::new(SystemClock),
            window: config.validity_window(),
            max_bytes: config.max_upload_bytes,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Rejects payloads above the size limit. Never hashes.
    pub fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_bytes {
            return Err(Error::OversizePayload {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Digest of a model identifier, memoized.
    pub async fn model_digest(&self, identifier: &str) -> Result<ModelDigest> {
        if let Some(d) = self.models.cached(identifier) {
            return Ok(d);
        }
        let models = self.models.clone();
        let identifier = identifier.to_string();
        tokio::task::spawn_blocking(move || models.digest(&identifier))
            .await
            .map_err(|e| Error::Store(format!("model digest task failed: {}", e)))?
    }

    /// Return the live record for `(bytes, model_identifier)`, creating it
    /// with `parse` if there is none.
    ///
    /// `parse` runs only when no live record exists. It should report
    /// malformed content as [`Error::Parse`]; any error it returns is
    /// propagated and nothing is persisted.
    pub async fn resolve<F, Fut>(
        &self,
        bytes: &[u8],
        model_identifier: &str,
        parse: F,
    ) -> Result<Resolution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<NewArtifact>>,
    {
        self.check_size(bytes.len())?;

        let content = self.hasher.content_digest(bytes);
        let model = self.model_digest(model_identifier).await?;
        let key = CacheKey::new(content, model);
        let now = whole_seconds(self.clock.now());

        let existing = self.store.find_by_key(&key).await?;
        if let Some(record) = existing.as_ref() {
            if record.is_live(now, self.window) {
                info!(key = %key, id = %record.id, "cache hit");
                return Ok(Resolution {
                    record: record.clone(),
                    was_cached: true,
                });
            }
            debug!(key = %key, id = %record.id, created_at = %record.created_at, "cached record is stale");
        }

        let artifact = parse().await?;
        let mut fresh = ArtifactRecord::create(&key, artifact, now);
        let refreshed = existing.is_some();
        let mut target = existing;

        // One retry covers a winner deleted between our conflict and re-read.
        for attempt in 0..2 {
            let written = match target.as_ref() {
                None => self.store.insert(&fresh).await,
                Some(stale) => {
                    fresh.id = stale.id.clone();
                    if fresh.display_name.is_none() {
                        fresh.display_name = stale.display_name.clone();
                    }
                    self.store.supersede(stale, &fresh).await
                }
            };

            match written {
                Ok(()) => {
                    info!(key = %key, id = %fresh.id, refreshed, "artifact stored");
                    return Ok(Resolution {
                        record: fresh,
                        was_cached: false,
                    });
                }
                Err(Error::Conflict(_)) => match self.store.find_by_key(&key).await? {
                    Some(winner) => {
                        debug!(key = %key, id = %winner.id, "concurrent write lost, returning winner");
                        return Ok(Resolution {
                            record: winner,
                            was_cached: true,
                        });
                    }
                    None => {
                        warn!(key = %key, attempt, "conflicting record vanished before re-read");
                        target = None;
                    }
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::NotFound(key.to_string()))
    }
}

/// The store keeps second resolution; trimming here keeps a freshly
/// created record equal to what a later lookup returns.
fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

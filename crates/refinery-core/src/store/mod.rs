//! Artifact storage abstraction.
//!
//! The [`ArtifactStore`] trait is the persisted store the ingestion cache
//! dedups against. Implementations must enforce uniqueness of
//! `(content_hash, model_hash)` themselves: the cache holds no lock and
//! relies on [`insert`](ArtifactStore::insert) and
//! [`supersede`](ArtifactStore::supersede) reporting [`Error::Conflict`]
//! when a concurrent writer got there first.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! [`Error::Conflict`]: crate::error::Error::Conflict

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ArtifactRecord, CacheKey};

/// Abstract persisted store of [`ArtifactRecord`]s.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_key`](ArtifactStore::find_by_key) | Dedup lookup |
/// | [`insert`](ArtifactStore::insert) | Atomic create, `Conflict` on duplicate key |
/// | [`supersede`](ArtifactStore::supersede) | Refresh a stale record in place |
/// | [`get`](ArtifactStore::get) / [`list`](ArtifactStore::list) | Reads by identity |
/// | [`rename`](ArtifactStore::rename) | Display-name edit |
/// | [`delete`](ArtifactStore::delete) | Explicit removal |
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The record stored under `key`, live or stale.
    async fn find_by_key(&self, key: &CacheKey) -> Result<Option<ArtifactRecord>>;

    /// Persist a new record as one atomic write.
    ///
    /// Fails with `Conflict` if a record already holds the same key; in
    /// that case nothing is written.
    async fn insert(&self, record: &ArtifactRecord) -> Result<()>;

    /// Replace the fields of `stale` with those of `fresh`, keeping
    /// `stale.id`.
    ///
    /// The write only applies if the stored row still carries
    /// `stale.created_at`; otherwise another writer refreshed it first and
    /// this returns `Conflict`.
    async fn supersede(&self, stale: &ArtifactRecord, fresh: &ArtifactRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ArtifactRecord>>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<ArtifactRecord>>;

    /// Set or clear the display name. Returns the updated record, or
    /// `None` if `id` does not exist.
    async fn rename(&self, id: &str, display_name: Option<&str>)
        -> Result<Option<ArtifactRecord>>;

    /// Remove a record. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

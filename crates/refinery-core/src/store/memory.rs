//! In-memory [`ArtifactStore`] for tests and embedded use.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. The key
//! uniqueness check and the write happen under one write guard, which
//! gives the same insert-or-conflict behaviour as the SQLite unique index.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{ArtifactRecord, CacheKey};

use super::ArtifactStore;

/// In-memory store keyed by record id.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, ArtifactRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ArtifactRecord>>> {
        self.records
            .read()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ArtifactRecord>>> {
        self.records
            .write()
            .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn holds_key(record: &ArtifactRecord, key: &CacheKey) -> bool {
    record.content_hash == key.content && record.model_hash == key.model
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn find_by_key(&self, key: &CacheKey) -> Result<Option<ArtifactRecord>> {
        let records = self.read()?;
        Ok(records.values().find(|r| holds_key(r, key)).cloned())
    }

    async fn insert(&self, record: &ArtifactRecord) -> Result<()> {
        let key = record.key();
        let mut records = self.write()?;
        if records.values().any(|r| holds_key(r, &key)) {
            return Err(Error::Conflict(key.to_string()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn supersede(&self, stale: &ArtifactRecord, fresh: &ArtifactRecord) -> Result<()> {
        let mut records = self.write()?;
        match records.get_mut(&stale.id) {
            Some(current) if current.created_at == stale.created_at => {
                *current = ArtifactRecord {
                    id: stale.id.clone(),
                    ..fresh.clone()
                };
                Ok(())
            }
            _ => Err(Error::Conflict(stale.key().to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ArtifactRecord>> {
        let mut all: Vec<ArtifactRecord> = self.read()?.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn rename(
        &self,
        id: &str,
        display_name: Option<&str>,
    ) -> Result<Option<ArtifactRecord>> {
        let mut records = self.write()?;
        Ok(records.get_mut(id).map(|r| {
            r.display_name = display_name.map(str::to_string);
            r.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentDigest, ModelDigest, NewArtifact};
    use chrono::{Duration, Utc};

    fn key(content: &str) -> CacheKey {
        CacheKey::new(
            ContentDigest::from_hex(content),
            ModelDigest::from_hex("model"),
        )
    }

    fn record(content: &str) -> ArtifactRecord {
        ArtifactRecord::create(
            &key(content),
            NewArtifact {
                filename: format!("{}.pdf", content),
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_key_conflicts() {
        let store = InMemoryStore::new();
        store.insert(&record("c1")).await.unwrap();
        let err = store.insert(&record("c1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn different_model_is_a_different_key() {
        let store = InMemoryStore::new();
        store.insert(&record("c1")).await.unwrap();
        let other = ArtifactRecord::create(
            &CacheKey::new(ContentDigest::from_hex("c1"), ModelDigest::from_hex("m2")),
            NewArtifact::default(),
            Utc::now(),
        );
        store.insert(&other).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn supersede_keeps_identity_and_rejects_second_writer() {
        let store = InMemoryStore::new();
        let mut stale = record("c1");
        stale.created_at = Utc::now() - Duration::days(40);
        store.insert(&stale).await.unwrap();

        let fresh = record("c1");
        store.supersede(&stale, &fresh).await.unwrap();
        let stored = store.get(&stale.id).await.unwrap().unwrap();
        assert_eq!(stored.id, stale.id);
        assert_eq!(stored.created_at, fresh.created_at);

        // A second refresher still holding the old timestamp loses.
        let err = store.supersede(&stale, &record("c1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rename_and_delete() {
        let store = InMemoryStore::new();
        let rec = record("c1");
        store.insert(&rec).await.unwrap();

        let renamed = store.rename(&rec.id, Some("mine")).await.unwrap().unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("mine"));
        assert!(store.rename("missing", Some("x")).await.unwrap().is_none());

        assert!(store.delete(&rec.id).await.unwrap());
        assert!(!store.delete(&rec.id).await.unwrap());
        assert!(store.get(&rec.id).await.unwrap().is_none());
    }
}

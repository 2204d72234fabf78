//! Artifact CRUD over an [`ArtifactStore`].
//!
//! Thin wrappers that turn "no such id" into [`Error::NotFound`] so the CLI
//! and HTTP layers report it the same way.

use refinery_core::models::ArtifactRecord;
use refinery_core::store::ArtifactStore;
use refinery_core::{Error, Result};

pub async fn list(store: &dyn ArtifactStore) -> Result<Vec<ArtifactRecord>> {
    store.list().await
}

pub async fn get(store: &dyn ArtifactStore, id: &str) -> Result<ArtifactRecord> {
    store
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Set or clear the display name. Blank names clear it.
pub async fn rename(
    store: &dyn ArtifactStore,
    id: &str,
    display_name: Option<&str>,
) -> Result<ArtifactRecord> {
    let name = display_name.map(str::trim).filter(|n| !n.is_empty());
    let updated = store
        .rename(id, name)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    tracing::info!(id, display_name = ?updated.display_name, "artifact renamed");
    Ok(updated)
}

pub async fn delete(store: &dyn ArtifactStore, id: &str) -> Result<()> {
    if !store.delete(id).await? {
        return Err(Error::NotFound(id.to_string()));
    }
    tracing::info!(id, "artifact deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refinery_core::models::{CacheKey, ContentDigest, ModelDigest, NewArtifact};
    use refinery_core::store::memory::InMemoryStore;

    async fn seeded() -> (InMemoryStore, String) {
        let store = InMemoryStore::new();
        let key = CacheKey::new(ContentDigest::from_hex("c"), ModelDigest::from_hex("m"));
        let rec = ArtifactRecord::create(
            &key,
            NewArtifact {
                filename: "test.pdf".to_string(),
                ..Default::default()
            },
            Utc::now(),
        );
        store.insert(&rec).await.unwrap();
        (store, rec.id)
    }

    #[tokio::test]
    async fn crud_flow() {
        let (store, id) = seeded().await;
        assert_eq!(list(&store).await.unwrap().len(), 1);

        let renamed = rename(&store, &id, Some(" renamed.pdf ")).await.unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("renamed.pdf"));
        assert_eq!(get(&store, &id).await.unwrap().display_name.as_deref(), Some("renamed.pdf"));

        let cleared = rename(&store, &id, Some("   ")).await.unwrap();
        assert!(cleared.display_name.is_none());

        delete(&store, &id).await.unwrap();
        assert!(matches!(get(&store, &id).await, Err(Error::NotFound(_))));
        assert!(matches!(delete(&store, &id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_missing_is_not_found() {
        let store = InMemoryStore::new();
        let err = rename(&store, "nope", Some("x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "nope"));
    }
}

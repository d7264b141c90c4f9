use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::database_ops::error::StoreError;
use crate::database_ops::models::{RefId, RefKind};
use crate::database_ops::store::CatalogTx;

/// Name -> id map shared by workers. Only committed ids are published into it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    ids: Mutex<HashMap<(RefKind, String), RefId>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(RefKind, String), RefId>> {
        // A panic while holding the lock leaves plain map data behind; keep using it.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, kind: RefKind, name: &str) -> Option<RefId> {
        self.lock().get(&(kind, name.to_string())).copied()
    }

    pub fn publish<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (RefKind, String, RefId)>,
    {
        let mut map = self.lock();
        for (kind, name, id) in entries {
            map.insert((kind, name), id);
        }
    }

    pub fn invalidate(&self, kind: RefKind, name: &str) {
        self.lock().remove(&(kind, name.to_string()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lookup-or-create for reference entities within one row transaction.
///
/// Ids seen during the row are held back and only reach the shared cache through
/// [`Resolver::publish`], which the caller invokes after a successful commit.
pub struct Resolver<'c> {
    cache: Option<&'c ReferenceCache>,
    seen: Vec<(RefKind, String, RefId)>,
}

impl<'c> Resolver<'c> {
    pub fn new(cache: Option<&'c ReferenceCache>) -> Self {
        Self {
            cache,
            seen: Vec::new(),
        }
    }

    /// Returns the id for `(kind, name)`, inserting the entity when it does not exist.
    /// `name` must already be trimmed and non-empty.
    pub async fn resolve(
        &mut self,
        tx: &mut dyn CatalogTx,
        kind: RefKind,
        name: &str,
    ) -> Result<RefId, StoreError> {
        if let Some(id) = self.cache.and_then(|c| c.get(kind, name)) {
            return Ok(id);
        }

        if let Some(id) = tx.find_reference(kind, name).await? {
            self.seen.push((kind, name.to_string(), id));
            return Ok(id);
        }

        if let Some(id) = tx.insert_reference(kind, name).await? {
            debug!(%kind, name, id = id.0, "reference created");
            self.seen.push((kind, name.to_string(), id));
            return Ok(id);
        }

        // Another writer committed the same name between our read and insert.
        // The unique constraint is authoritative: re-read and adopt the winner's id.
        if let Some(cache) = self.cache {
            cache.invalidate(kind, name);
        }
        match tx.find_reference(kind, name).await? {
            Some(id) => {
                debug!(%kind, name, id = id.0, "reference insert conflicted; adopted existing id");
                self.seen.push((kind, name.to_string(), id));
                Ok(id)
            }
            None => {
                warn!(%kind, name, "reference conflicted but is not visible after re-read");
                Err(StoreError::Constraint(format!(
                    "{kind} {name:?} conflicted on insert but could not be re-read"
                )))
            }
        }
    }

    /// Pushes the ids resolved in a committed transaction into the shared cache.
    pub fn publish(self) {
        if let Some(cache) = self.cache {
            cache.publish(self.seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryCatalogStore;
    use crate::database_ops::models::{AppId, GameAttributes, MediaKind};
    use crate::database_ops::store::CatalogStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    /// Simulates losing a race: the first lookup misses even though a concurrent
    /// writer has already committed the name.
    struct StaleReadTx {
        inner: Box<dyn CatalogTx>,
        stale_lookups: usize,
    }

    #[async_trait]
    impl CatalogTx for StaleReadTx {
        async fn upsert_game(&mut self, game: &GameAttributes) -> Result<(), StoreError> {
            self.inner.upsert_game(game).await
        }
        async fn find_reference(
            &mut self,
            kind: RefKind,
            name: &str,
        ) -> Result<Option<RefId>, StoreError> {
            if self.stale_lookups > 0 {
                self.stale_lookups -= 1;
                return Ok(None);
            }
            self.inner.find_reference(kind, name).await
        }
        async fn insert_reference(
            &mut self,
            kind: RefKind,
            name: &str,
        ) -> Result<Option<RefId>, StoreError> {
            self.inner.insert_reference(kind, name).await
        }
        async fn associated_ids(
            &mut self,
            app_id: AppId,
            kind: RefKind,
        ) -> Result<BTreeSet<RefId>, StoreError> {
            self.inner.associated_ids(app_id, kind).await
        }
        async fn link(
            &mut self,
            app_id: AppId,
            kind: RefKind,
            ids: &[RefId],
        ) -> Result<(), StoreError> {
            self.inner.link(app_id, kind, ids).await
        }
        async fn unlink(
            &mut self,
            app_id: AppId,
            kind: RefKind,
            ids: &[RefId],
        ) -> Result<(), StoreError> {
            self.inner.unlink(app_id, kind, ids).await
        }
        async fn replace_media(
            &mut self,
            app_id: AppId,
            kind: MediaKind,
            urls: &[String],
        ) -> Result<(), StoreError> {
            self.inner.replace_media(app_id, kind, urls).await
        }
        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.commit().await
        }
        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn same_name_resolves_to_same_id() {
        let store = MemoryCatalogStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut resolver = Resolver::new(None);
        let a = resolver.resolve(tx.as_mut(), RefKind::Developer, "Valve").await.unwrap();
        let b = resolver.resolve(tx.as_mut(), RefKind::Developer, "Valve").await.unwrap();
        resolver.resolve(tx.as_mut(), RefKind::Publisher, "Valve").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.reference_count(RefKind::Developer).await, 1);
        assert_eq!(store.reference_count(RefKind::Publisher).await, 1);
    }

    #[tokio::test]
    async fn names_are_case_sensitive() {
        let store = MemoryCatalogStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut resolver = Resolver::new(None);
        let upper = resolver.resolve(tx.as_mut(), RefKind::Tag, "RPG").await.unwrap();
        let lower = resolver.resolve(tx.as_mut(), RefKind::Tag, "rpg").await.unwrap();
        tx.commit().await.unwrap();
        assert_ne!(upper, lower);
        assert_eq!(store.reference_count(RefKind::Tag).await, 2);
    }

    #[tokio::test]
    async fn conflicting_insert_adopts_winner_id() {
        let store = MemoryCatalogStore::new();
        let winner = {
            let mut tx = store.begin().await.unwrap();
            let id = Resolver::new(None)
                .resolve(tx.as_mut(), RefKind::Genre, "Action")
                .await
                .unwrap();
            tx.commit().await.unwrap();
            id
        };

        let cache = ReferenceCache::new();
        let inner = store.begin().await.unwrap();
        let mut racy: Box<dyn CatalogTx> = Box::new(StaleReadTx {
            inner,
            stale_lookups: 1,
        });
        let mut resolver = Resolver::new(Some(&cache));
        let got = resolver
            .resolve(racy.as_mut(), RefKind::Genre, "Action")
            .await
            .unwrap();
        racy.commit().await.unwrap();
        resolver.publish();

        assert_eq!(got, winner);
        assert_eq!(store.reference_count(RefKind::Genre).await, 1);
        assert_eq!(cache.get(RefKind::Genre, "Action"), Some(winner));
    }

    #[tokio::test]
    async fn cache_is_only_filled_after_publish() {
        let store = MemoryCatalogStore::new();
        let cache = ReferenceCache::new();
        let mut tx = store.begin().await.unwrap();
        let mut resolver = Resolver::new(Some(&cache));
        resolver.resolve(tx.as_mut(), RefKind::Tag, "Indie").await.unwrap();
        assert!(cache.is_empty());
        tx.rollback().await.unwrap();
        drop(resolver);
        assert!(cache.is_empty());
        assert_eq!(store.reference_count(RefKind::Tag).await, 0);
    }
}

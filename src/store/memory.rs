//! In-memory store backing all three adapter roles.
//!
//! One `DashMap`-backed type implements [`PrimaryStore`], [`CacheStore`],
//! and [`SecondaryStore`], so tests and embedded callers can assemble a
//! full composite without external backends. TTL entries written through
//! the cache role are checked lazily on every read, the same way the Redis
//! adapter relies on server-side expiry.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::warn;

use crate::entity::Entity;

use super::traits::{CacheStore, PrimaryStore, SecondaryStore, StoreError};

struct Stored<E> {
    entity: E,
    expires_at: Option<Instant>,
}

impl<E> Stored<E> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

pub struct InMemoryStore<E: Entity> {
    data: DashMap<E::Id, Stored<E>>,
}

impl<E: Entity> InMemoryStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Get current item count (expired entries included until next access).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all items.
    pub fn clear(&self) {
        self.data.clear();
    }

    fn read(&self, id: &E::Id) -> Option<E> {
        let entry = self.data.get(id)?;
        if entry.is_expired() {
            drop(entry);
            self.data.remove_if(id, |_, v| v.is_expired());
            return None;
        }
        Some(entry.entity.clone())
    }

    fn put(&self, entity: &E, ttl: Option<Duration>) {
        self.data.insert(
            entity.id(),
            Stored {
                entity: entity.clone(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }
}

impl<E: Entity> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> PrimaryStore<E> for InMemoryStore<E> {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        Ok(self.read(id))
    }

    async fn add(&self, entity: &E) -> Result<(), StoreError> {
        self.put(entity, None);
        Ok(())
    }

    async fn update(&self, entity: &E) -> Result<(), StoreError> {
        let id = entity.id();
        if self.read(&id).is_none() {
            warn!(id = %id, "update for unknown id ignored; not creating");
            return Ok(());
        }
        self.put(entity, None);
        Ok(())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        self.data.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        Ok(self.read(id).is_some())
    }

    async fn browse_all(&self) -> Result<Vec<E>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|r| !r.value().is_expired())
            .map(|r| r.value().entity.clone())
            .collect())
    }
}

#[async_trait]
impl<E: Entity> CacheStore<E> for InMemoryStore<E> {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        Ok(self.read(id))
    }

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StoreError> {
        self.put(entity, Some(ttl));
        Ok(())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        self.data.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        Ok(self.read(id).is_some())
    }
}

#[async_trait]
impl<E: Entity> SecondaryStore<E> for InMemoryStore<E> {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        Ok(self.read(id))
    }

    async fn add(&self, entity: &E) -> Result<(), StoreError> {
        self.put(entity, None);
        Ok(())
    }

    async fn update(&self, entity: &E) -> Result<(), StoreError> {
        // Document semantics: update is a whole-document replace.
        self.put(entity, None);
        Ok(())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        self.data.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        Ok(self.read(id).is_some())
    }

    async fn browse_all(&self) -> Result<Vec<E>, StoreError> {
        PrimaryStore::browse_all(self).await
    }

    async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|r| !r.value().is_expired())
            .filter(|r| r.value().entity.scoped_field().as_deref() == Some(value))
            .map(|r| r.value().entity.clone())
            .collect())
    }
}

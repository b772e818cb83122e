use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::Entity;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// The authoritative, transactional store. Errors from any operation here
/// are fatal and propagate to the caller unchanged; this store is the
/// fallback of last resort for every read path and the sole source for
/// reconciliation sweeps.
#[async_trait]
pub trait PrimaryStore<E: Entity>: Send + Sync {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError>;

    async fn add(&self, entity: &E) -> Result<(), StoreError>;

    /// Update an existing entity. An unknown id is a warned no-op, never an
    /// implicit create.
    async fn update(&self, entity: &E) -> Result<(), StoreError>;

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError>;

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError>;

    /// Full listing. Expensive; only administrative paths and the
    /// reconciler use it.
    async fn browse_all(&self) -> Result<Vec<E>, StoreError>;

    /// Filtered scan on the scoped field. Default implementation filters
    /// `browse_all`, which is correct for any backend; SQL overrides it
    /// with a WHERE clause.
    async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError> {
        Ok(self
            .browse_all()
            .await?
            .into_iter()
            .filter(|e| e.scoped_field().as_deref() == Some(value))
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.browse_all().await?.len() as u64)
    }

    /// Connectivity probe for startup/readiness checks.
    async fn can_connect(&self) -> bool {
        true
    }
}

/// Low-latency key/value layer with TTL. Best-effort: callers catch and log
/// every failure, never surface it. A miss or error here never implies the
/// entity does not exist.
#[async_trait]
pub trait CacheStore<E: Entity>: Send + Sync {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError>;

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError>;

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError>;

    /// Key/value caches have no secondary indexes. Returning `Unsupported`
    /// (rather than `Backend`) tells the caller to move to the next layer
    /// without logging a failure.
    async fn find_by_scoped_field(&self, _value: &str) -> Result<Vec<E>, StoreError> {
        Err(StoreError::Unsupported("cache store has no secondary indexes"))
    }
}

/// Query-optimized document store. Writes are best-effort from the caller's
/// perspective; reads may fail and the orchestrator cascades to Primary.
#[async_trait]
pub trait SecondaryStore<E: Entity>: Send + Sync {
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError>;

    async fn add(&self, entity: &E) -> Result<(), StoreError>;

    async fn update(&self, entity: &E) -> Result<(), StoreError>;

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError>;

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError>;

    async fn browse_all(&self) -> Result<Vec<E>, StoreError>;

    /// Secondary-index lookup; this is the access pattern the store exists
    /// for.
    async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError>;
}

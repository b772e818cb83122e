//! Redis backend for the cache store.
//!
//! Entities are serialized to JSON and stored under `{prefix}{id}` with a
//! server-side TTL, so staleness is bounded by expiry rather than by any
//! invalidation protocol. Secondary-index queries are deliberately not
//! implemented here; the trait default reports them as unsupported and the
//! orchestrator moves on to the document store.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entity::Entity;
use crate::retry::{retry, RetryConfig};

use super::traits::{CacheStore, StoreError};

pub struct RedisCacheStore<E> {
    connection: ConnectionManager,
    /// Key prefix for namespacing (e.g. "credentials:cache:")
    prefix: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> RedisCacheStore<E> {
    pub async fn new(connection_string: &str, prefix: &str) -> Result<Self, StoreError> {
        let client =
            Client::open(connection_string).map_err(|e| StoreError::Backend(e.to_string()))?;

        let connection = retry("redis_cache_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            _entity: PhantomData,
        })
    }

    /// Get a clone of the connection manager (for sharing with the
    /// document store when both live on one Redis instance).
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    #[inline]
    fn key(&self, id: &impl std::fmt::Display) -> String {
        format!("{}{}", self.prefix, id)
    }
}

#[async_trait]
impl<E> CacheStore<E> for RedisCacheStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let mut conn = self.connection.clone();
        let body: Option<String> = conn
            .get(self.key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match body {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt cache entry: {e}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, entity: &E, ttl: Duration) -> Result<(), StoreError> {
        let body = serde_json::to_string(entity)
            .map_err(|e| StoreError::Backend(format!("serialize entity: {e}")))?;
        let mut conn = self.connection.clone();
        // Redis rejects EX 0; clamp to one second.
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(&entity.id()), body, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        conn.exists(self.key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

//! Redis-backed document store for the secondary role.
//!
//! Key layout under a configurable prefix:
//!
//! ```text
//! {prefix}doc:{id}        entity JSON
//! {prefix}ids             set of all ids (drives browse_all)
//! {prefix}scope:{value}   set of ids per scoped-field value
//! ```
//!
//! Writes maintain the id set and the per-value index set in one MULTI
//! pipeline, so a document never becomes visible without its index entries.
//! An update whose scoped value changed moves the id between index sets.
//! Documents have no TTL; this store is a full (if eventually consistent)
//! replica of the primary, not a cache.

use std::marker::PhantomData;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{pipe, AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::entity::Entity;
use crate::retry::{retry, RetryConfig};

use super::traits::{SecondaryStore, StoreError};

pub struct RedisDocumentStore<E> {
    connection: ConnectionManager,
    prefix: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E> RedisDocumentStore<E> {
    pub async fn new(connection_string: &str, prefix: &str) -> Result<Self, StoreError> {
        let client =
            Client::open(connection_string).map_err(|e| StoreError::Backend(e.to_string()))?;

        let connection = retry("redis_doc_connect", &RetryConfig::startup(), || async {
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

    /// Reuse an existing connection manager (shared Redis instance).
    pub fn from_connection(connection: ConnectionManager, prefix: &str) -> Self {
        Self {
            connection,
            prefix: prefix.to_string(),
            _entity: PhantomData,
        }
    }

    #[inline]
    fn doc_key(&self, id: &impl std::fmt::Display) -> String {
        format!("{}doc:{}", self.prefix, id)
    }

    #[inline]
    fn ids_key(&self) -> String {
        format!("{}ids", self.prefix)
    }

    #[inline]
    fn scope_key(&self, value: &str) -> String {
        format!("{}scope:{}", self.prefix, value)
    }

    async fn fetch_docs(&self, ids: Vec<String>) -> Result<Vec<String>, StoreError>
    where
        E: Entity,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.doc_key(id)).collect();
        let mut conn = self.connection.clone();
        let bodies: Vec<Option<String>> = conn
            .mget(keys)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        // Index sets can briefly reference ids whose document was removed
        // by a concurrent delete; such holes are skipped.
        Ok(bodies.into_iter().flatten().collect())
    }

    fn decode_all(bodies: Vec<String>) -> Vec<E>
    where
        E: DeserializeOwned,
    {
        bodies
            .into_iter()
            .filter_map(|body| match serde_json::from_str(&body) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable document");
                    None
                }
            })
            .collect()
    }
}

impl<E> RedisDocumentStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    /// Whole-document upsert, maintaining the id set and scope index.
    async fn put(&self, entity: &E) -> Result<(), StoreError> {
        let id = entity.id().to_string();
        let body = serde_json::to_string(entity)
            .map_err(|e| StoreError::Backend(format!("serialize entity: {e}")))?;

        // Read the previous version first so a changed scoped value moves
        // the id between index sets.
        let old_scope = SecondaryStore::get(self, &entity.id())
            .await?
            .and_then(|old| old.scoped_field());
        let new_scope = entity.scoped_field();

        let mut p = pipe();
        p.atomic();
        p.set(self.doc_key(&id), body).ignore();
        p.sadd(self.ids_key(), &id).ignore();
        if let Some(ref old) = old_scope {
            if old_scope != new_scope {
                p.srem(self.scope_key(old), &id).ignore();
            }
        }
        if let Some(ref scope) = new_scope {
            p.sadd(self.scope_key(scope), &id).ignore();
        }

        let mut conn = self.connection.clone();
        p.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl<E> SecondaryStore<E> for RedisDocumentStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let mut conn = self.connection.clone();
        let body: Option<String> = conn
            .get(self.doc_key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match body {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt document: {e}"))),
            None => Ok(None),
        }
    }

    async fn add(&self, entity: &E) -> Result<(), StoreError> {
        self.put(entity).await
    }

    async fn update(&self, entity: &E) -> Result<(), StoreError> {
        self.put(entity).await
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        let old_scope = SecondaryStore::get(self, id).await?.and_then(|old| old.scoped_field());
        let id = id.to_string();

        let mut p = pipe();
        p.atomic();
        p.del(self.doc_key(&id)).ignore();
        p.srem(self.ids_key(), &id).ignore();
        if let Some(ref scope) = old_scope {
            p.srem(self.scope_key(scope), &id).ignore();
        }

        let mut conn = self.connection.clone();
        p.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        conn.exists(self.doc_key(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn browse_all(&self) -> Result<Vec<E>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn
            .smembers(self.ids_key())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let bodies = self.fetch_docs(ids).await?;
        Ok(Self::decode_all(bodies))
    }

    async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn
            .smembers(self.scope_key(value))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let bodies = self.fetch_docs(ids).await?;
        Ok(Self::decode_all(bodies))
    }
}

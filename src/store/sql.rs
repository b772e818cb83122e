//! SQL backend for the primary store.
//!
//! One table per entity type, with the entity serialized as JSON in a TEXT
//! column plus a dedicated `scoped_field` column so scoped lookups can use
//! a WHERE clause instead of a full scan:
//!
//! ```sql
//! CREATE TABLE entities (
//!   id VARCHAR(255) PRIMARY KEY,
//!   body LONGTEXT NOT NULL,      -- entity JSON
//!   scoped_field VARCHAR(255),   -- secondary-indexed value, nullable
//!   updated_at BIGINT NOT NULL   -- epoch millis
//! )
//! ```
//!
//! ## sqlx Any driver quirks
//!
//! We use TEXT instead of a native JSON type because sqlx's `Any` driver
//! doesn't support MySQL's JSON type mapping, and it sometimes surfaces
//! TEXT columns as byte arrays. Reads therefore try `String` first and fall
//! back to `Vec<u8>`.

use std::marker::PhantomData;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::warn;

use crate::entity::Entity;
use crate::retry::{retry, RetryConfig};

use super::traits::{PrimaryStore, StoreError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlStore<E> {
    pool: AnyPool,
    table: String,
    is_sqlite: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> SqlStore<E> {
    /// Connect with startup-mode retry (fails fast if the URL is wrong) and
    /// create the table if it does not exist.
    pub async fn new(connection_string: &str, table: &str) -> Result<Self, StoreError> {
        install_drivers();

        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::Backend(format!("invalid table name: {table:?}")));
        }

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            table: table.to_string(),
            is_sqlite,
            _entity: PhantomData,
        };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other stores.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// Enable WAL mode for SQLite: concurrent reads during writes and a
    /// single fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to enable WAL mode: {e}")))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to set synchronous mode: {e}")))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let sql = if self.is_sqlite {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    body TEXT NOT NULL,
                    scoped_field TEXT,
                    updated_at INTEGER NOT NULL
                )",
                self.table
            )
        } else {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id VARCHAR(255) PRIMARY KEY,
                    body LONGTEXT NOT NULL,
                    scoped_field VARCHAR(255),
                    updated_at BIGINT NOT NULL,
                    INDEX idx_scoped_field (scoped_field)
                )",
                self.table
            )
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    fn now_millis() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

impl<E: DeserializeOwned> SqlStore<E> {
    fn decode_body(row: &sqlx::any::AnyRow) -> Option<E> {
        let body: Option<String> = row.try_get::<String, _>("body").ok().or_else(|| {
            row.try_get::<Vec<u8>, _>("body")
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
        });
        let body = body?;
        match serde_json::from_str(&body) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(error = %e, "skipping row with undecodable entity body");
                None
            }
        }
    }
}

#[async_trait]
impl<E> PrimaryStore<E> for SqlStore<E>
where
    E: Entity + Serialize + DeserializeOwned,
{
    async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let sql = format!("SELECT body FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.as_ref().and_then(Self::decode_body))
    }

    async fn add(&self, entity: &E) -> Result<(), StoreError> {
        let body = serde_json::to_string(entity)
            .map_err(|e| StoreError::Backend(format!("serialize entity: {e}")))?;
        let sql = format!(
            "INSERT INTO {} (id, body, scoped_field, updated_at) VALUES (?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(entity.id().to_string())
            .bind(body)
            .bind(entity.scoped_field())
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update(&self, entity: &E) -> Result<(), StoreError> {
        let body = serde_json::to_string(entity)
            .map_err(|e| StoreError::Backend(format!("serialize entity: {e}")))?;
        let sql = format!(
            "UPDATE {} SET body = ?, scoped_field = ?, updated_at = ? WHERE id = ?",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(body)
            .bind(entity.scoped_field())
            .bind(Self::now_millis())
            .bind(entity.id().to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            warn!(id = %entity.id(), table = %self.table, "update for unknown id ignored; not creating");
        }
        Ok(())
    }

    async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count > 0)
    }

    async fn browse_all(&self) -> Result<Vec<E>, StoreError> {
        let sql = format!("SELECT body FROM {}", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.iter().filter_map(Self::decode_body).collect())
    }

    async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError> {
        let sql = format!("SELECT body FROM {} WHERE scoped_field = ?", self.table);
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.iter().filter_map(Self::decode_body).collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", self.table);
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(count as u64)
    }

    async fn can_connect(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

//! # polysync
//!
//! A polyglot-persistence synchronization layer: one authoritative
//! relational store kept consistent with a fast key-value cache and a
//! query-optimized document store, behind a single repository API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CompositeRepository                       │
//! │  • writes: primary first, then best-effort fan-out          │
//! │  • reads: cache → secondary → primary cascade               │
//! └─────────────────────────────────────────────────────────────┘
//!        │                  │                    │
//!        ▼                  ▼                    ▼
//! ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐
//! │   Primary   │    │    Cache    │    │    Secondary     │
//! │  (SQL, the  │    │ (Redis TTL  │    │ (Redis document  │
//! │   truth)    │    │   keys)     │    │  + index sets)   │
//! └─────────────┘    └─────────────┘    └──────────────────┘
//!        │                                       ▲
//!        │    ┌──────────────────────────────┐   │
//!        ├───▶│  Reconciler (periodic sweep) │───┤
//!        │    └──────────────────────────────┘   │
//!        │    ┌──────────────────────────────┐   │
//!        └───▶│ EventSyncService (on-write)  │───┘
//!             └──────────────────────────────┘
//! ```
//!
//! Only a primary failure ever fails a business operation: the cache and
//! secondary stores are best-effort on writes and fall-through layers on
//! reads. The reconciler repairs drift on an interval; the event-driven
//! service keeps replication lag low for single entities and surfaces
//! replication failures to callers that want to react to them. The
//! [`LockSlot`] is an independent coordination primitive for callers that
//! need to serialize access to a shared resource.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use polysync::{CompositeRepository, Entity, InMemoryStore};
//!
//! #[derive(Clone)]
//! struct Credential { id: String, tenant: String }
//!
//! impl Entity for Credential {
//!     type Id = String;
//!     fn id(&self) -> String { self.id.clone() }
//!     fn scoped_field(&self) -> Option<String> { Some(self.tenant.clone()) }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let repo = CompositeRepository::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryStore::new()),
//!     Duration::from_secs(300),
//! );
//!
//! let cred = Credential { id: "c-1".into(), tenant: "t-1".into() };
//! repo.add(&cred).await.unwrap();
//! assert!(repo.get(&"c-1".to_string()).await.unwrap().is_some());
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`repository`]: the [`CompositeRepository`] orchestrator
//! - [`store`]: store contracts and the memory/SQL/Redis adapters
//! - [`reconciler`]: the periodic drift-repair sweep
//! - [`event_sync`]: immediate per-entity propagation with health tracking
//! - [`status`]: the rolling sync-health window
//! - [`lock`]: the cross-caller lock slot
//! - [`retry`]: connection retry with backoff

pub mod config;
pub mod entity;
pub mod event_sync;
pub mod lock;
pub mod metrics;
pub mod reconciler;
pub mod repository;
pub mod retry;
pub mod status;
pub mod store;

pub use config::SyncConfig;
pub use entity::Entity;
pub use event_sync::EventSyncService;
pub use lock::{LockError, LockHandle, LockInfo, LockSlot};
pub use reconciler::{Reconciler, SweepReport};
pub use repository::CompositeRepository;
pub use retry::RetryConfig;
pub use status::{SyncStatus, SyncStatusTracker, HEALTH_WINDOW};
pub use store::document::RedisDocumentStore;
pub use store::memory::InMemoryStore;
pub use store::redis::RedisCacheStore;
pub use store::sql::SqlStore;
pub use store::traits::{CacheStore, PrimaryStore, SecondaryStore, StoreError};

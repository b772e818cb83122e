//! The composite repository: one logical read/write API over the three
//! store adapters.
//!
//! Policy summary:
//! - writes hit the primary synchronously, then fan out best-effort to the
//!   cache and the secondary store; only a primary failure fails the call
//! - reads cascade cache → secondary → primary, swallowing intermediate
//!   failures, so a single non-primary outage never fails a read
//! - scoped lookups prefer the secondary store, full listings always go
//!   straight to the primary

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::entity::Entity;
use crate::metrics;
use crate::store::traits::{CacheStore, PrimaryStore, SecondaryStore, StoreError};

pub struct CompositeRepository<E: Entity> {
    primary: Arc<dyn PrimaryStore<E>>,
    cache: Arc<dyn CacheStore<E>>,
    secondary: Arc<dyn SecondaryStore<E>>,
    cache_ttl: Duration,
}

impl<E: Entity> CompositeRepository<E> {
    pub fn new(
        primary: Arc<dyn PrimaryStore<E>>,
        cache: Arc<dyn CacheStore<E>>,
        secondary: Arc<dyn SecondaryStore<E>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            primary,
            cache,
            secondary,
            cache_ttl,
        }
    }

    pub fn primary(&self) -> Arc<dyn PrimaryStore<E>> {
        self.primary.clone()
    }

    pub fn secondary(&self) -> Arc<dyn SecondaryStore<E>> {
        self.secondary.clone()
    }

    /// Add a new entity. The primary write is authoritative; cache and
    /// secondary propagation are best-effort and cannot fail the call.
    pub async fn add(&self, entity: &E) -> Result<(), StoreError> {
        let started = Instant::now();
        self.primary.add(entity).await?;
        metrics::record_operation("primary", "add", "success");
        metrics::record_latency("primary", "add", started.elapsed());
        self.fan_out(entity, false).await;
        Ok(())
    }

    /// Update an existing entity; same fan-out policy as [`add`](Self::add).
    ///
    /// When the primary reports an unknown-id no-op the fan-out still runs,
    /// so the cache and secondary can briefly hold a copy the primary never
    /// stored: the cache entry ages out with its TTL, the secondary copy
    /// stays until deleted.
    pub async fn update(&self, entity: &E) -> Result<(), StoreError> {
        let started = Instant::now();
        self.primary.update(entity).await?;
        metrics::record_operation("primary", "update", "success");
        metrics::record_latency("primary", "update", started.elapsed());
        self.fan_out(entity, true).await;
        Ok(())
    }

    /// Propagate a committed primary write to cache and secondary. Order
    /// is fixed: cheapest propagation first. Failures are logged and
    /// swallowed; the write already succeeded.
    async fn fan_out(&self, entity: &E, is_update: bool) {
        let id = entity.id();

        if let Err(e) = self.cache.set(entity, self.cache_ttl).await {
            warn!(id = %id, error = %e, "cache write failed, continuing");
            metrics::record_fanout_failure("cache", "set");
        }

        let result = if is_update {
            self.secondary.update(entity).await
        } else {
            self.secondary.add(entity).await
        };
        if let Err(e) = result {
            warn!(id = %id, error = %e, "secondary write failed, continuing");
            metrics::record_fanout_failure("secondary", "write");
        }
    }

    /// Cascading read: cache, then secondary, then primary. A `None` from
    /// the primary is the authoritative "not found"; misses and errors
    /// from the other layers only move the cascade along.
    pub async fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let started = Instant::now();
        match self.cache.get(id).await {
            Ok(Some(entity)) => {
                metrics::record_operation("cache", "get", "hit");
                metrics::record_latency("cache", "get", started.elapsed());
                return Ok(Some(entity));
            }
            Ok(None) => {
                metrics::record_read_fallback("cache", "secondary");
            }
            Err(e) => {
                warn!(id = %id, error = %e, "cache read failed, falling back to secondary");
                metrics::record_read_fallback("cache", "secondary");
            }
        }

        let started = Instant::now();
        match self.secondary.get(id).await {
            Ok(Some(entity)) => {
                metrics::record_operation("secondary", "get", "hit");
                metrics::record_latency("secondary", "get", started.elapsed());
                return Ok(Some(entity));
            }
            Ok(None) => {
                metrics::record_read_fallback("secondary", "primary");
            }
            Err(e) => {
                warn!(id = %id, error = %e, "secondary read failed, falling back to primary");
                metrics::record_read_fallback("secondary", "primary");
            }
        }

        let started = Instant::now();
        let found = self.primary.get(id).await?;
        metrics::record_latency("primary", "get", started.elapsed());
        Ok(found)
    }

    /// Existence cascade, short-circuiting on the first `true`. Only the
    /// primary's answer is authoritative for absence.
    pub async fn exists(&self, id: &E::Id) -> Result<bool, StoreError> {
        match self.cache.exists(id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                warn!(id = %id, error = %e, "cache exists failed, falling back");
            }
        }

        match self.secondary.exists(id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                warn!(id = %id, error = %e, "secondary exists failed, falling back");
            }
        }

        self.primary.exists(id).await
    }

    /// Scoped/secondary-index lookup. The secondary store is built for
    /// this access pattern; on error or an empty result the primary's
    /// filtered scan answers instead.
    pub async fn find_by_scoped_field(&self, value: &str) -> Result<Vec<E>, StoreError> {
        match self.secondary.find_by_scoped_field(value).await {
            Ok(entities) if !entities.is_empty() => {
                metrics::record_operation("secondary", "find", "hit");
                return Ok(entities);
            }
            Ok(_) => {
                metrics::record_read_fallback("secondary", "primary");
            }
            Err(e) => {
                warn!(value, error = %e, "secondary scoped query failed, falling back to primary");
                metrics::record_read_fallback("secondary", "primary");
            }
        }

        self.primary.find_by_scoped_field(value).await
    }

    /// Full listing, always served by the primary. Administrative
    /// listings are rare and benefit more from strong consistency than
    /// from cache-layer speed, so the cascade is skipped on purpose.
    pub async fn browse_all(&self) -> Result<Vec<E>, StoreError> {
        self.primary.browse_all().await
    }

    /// Entity count, primary-only for the same reason as
    /// [`browse_all`](Self::browse_all).
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.primary.count().await
    }

    /// Delete from the primary (must succeed), then best-effort from the
    /// other two layers.
    pub async fn delete(&self, id: &E::Id) -> Result<(), StoreError> {
        let started = Instant::now();
        self.primary.delete(id).await?;
        metrics::record_operation("primary", "delete", "success");
        metrics::record_latency("primary", "delete", started.elapsed());

        if let Err(e) = self.cache.delete(id).await {
            warn!(id = %id, error = %e, "cache delete failed, continuing");
            metrics::record_fanout_failure("cache", "delete");
        }
        if let Err(e) = self.secondary.delete(id).await {
            warn!(id = %id, error = %e, "secondary delete failed, continuing");
            metrics::record_fanout_failure("secondary", "delete");
        }
        Ok(())
    }

    /// Readiness probe: only primary connectivity matters for startup.
    pub async fn can_connect(&self) -> bool {
        self.primary.can_connect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    #[derive(Clone, Debug, PartialEq)]
    struct Doc {
        id: String,
        tenant: String,
        rev: u32,
    }

    impl Entity for Doc {
        type Id = String;

        fn id(&self) -> String {
            self.id.clone()
        }

        fn scoped_field(&self) -> Option<String> {
            Some(self.tenant.clone())
        }
    }

    fn doc(id: &str, tenant: &str) -> Doc {
        Doc {
            id: id.to_string(),
            tenant: tenant.to_string(),
            rev: 1,
        }
    }

    /// Secondary store that fails every call, for policy assertions.
    struct DeadSecondary;

    #[async_trait]
    impl SecondaryStore<Doc> for DeadSecondary {
        async fn get(&self, _id: &String) -> Result<Option<Doc>, StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn add(&self, _entity: &Doc) -> Result<(), StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn update(&self, _entity: &Doc) -> Result<(), StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn delete(&self, _id: &String) -> Result<(), StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn exists(&self, _id: &String) -> Result<bool, StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn browse_all(&self) -> Result<Vec<Doc>, StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
        async fn find_by_scoped_field(&self, _value: &str) -> Result<Vec<Doc>, StoreError> {
            Err(StoreError::Backend("secondary down".into()))
        }
    }

    fn full_memory_repo() -> (
        CompositeRepository<Doc>,
        Arc<InMemoryStore<Doc>>,
        Arc<InMemoryStore<Doc>>,
        Arc<InMemoryStore<Doc>>,
    ) {
        let primary = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryStore::new());
        let secondary = Arc::new(InMemoryStore::new());
        let repo = CompositeRepository::new(
            primary.clone(),
            cache.clone(),
            secondary.clone(),
            Duration::from_secs(60),
        );
        (repo, primary, cache, secondary)
    }

    #[tokio::test]
    async fn add_writes_through_all_layers() {
        let (repo, primary, cache, secondary) = full_memory_repo();
        repo.add(&doc("d1", "t1")).await.unwrap();

        assert!(PrimaryStore::exists(primary.as_ref(), &"d1".to_string()).await.unwrap());
        assert!(CacheStore::exists(cache.as_ref(), &"d1".to_string()).await.unwrap());
        assert!(SecondaryStore::exists(secondary.as_ref(), &"d1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn write_succeeds_with_dead_secondary() {
        let primary = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryStore::new());
        let repo = CompositeRepository::new(
            primary.clone(),
            cache,
            Arc::new(DeadSecondary),
            Duration::from_secs(60),
        );

        repo.add(&doc("d1", "t1")).await.unwrap();
        assert!(PrimaryStore::exists(primary.as_ref(), &"d1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn get_falls_back_to_primary_past_dead_secondary() {
        let primary = Arc::new(InMemoryStore::new());
        PrimaryStore::add(primary.as_ref(), &doc("d1", "t1")).await.unwrap();

        let repo = CompositeRepository::new(
            primary,
            Arc::new(InMemoryStore::new()),
            Arc::new(DeadSecondary),
            Duration::from_secs(60),
        );

        let found = repo.get(&"d1".to_string()).await.unwrap();
        assert_eq!(found.unwrap().id, "d1");
    }

    #[tokio::test]
    async fn get_miss_everywhere_is_none_not_error() {
        let (repo, _, _, _) = full_memory_repo();
        assert!(repo.get(&"nope".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn browse_is_primary_only() {
        let (repo, _, cache, secondary) = full_memory_repo();
        // Entities only the non-authoritative layers know about must not
        // appear in a browse.
        CacheStore::set(cache.as_ref(), &doc("c1", "t"), Duration::from_secs(60))
            .await
            .unwrap();
        SecondaryStore::add(secondary.as_ref(), &doc("s1", "t")).await.unwrap();

        assert!(repo.browse_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scoped_find_falls_back_on_empty_secondary() {
        let (repo, primary, _, _) = full_memory_repo();
        PrimaryStore::add(primary.as_ref(), &doc("d1", "t9")).await.unwrap();

        let hits = repo.find_by_scoped_field("t9").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d1");
    }

    #[tokio::test]
    async fn scoped_find_prefers_secondary() {
        let (repo, _, _, secondary) = full_memory_repo();
        SecondaryStore::add(secondary.as_ref(), &doc("s1", "t1")).await.unwrap();

        let hits = repo.find_by_scoped_field("t1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "s1");
    }

    #[tokio::test]
    async fn delete_removes_from_all_layers() {
        let (repo, primary, cache, secondary) = full_memory_repo();
        repo.add(&doc("d1", "t1")).await.unwrap();
        repo.delete(&"d1".to_string()).await.unwrap();

        assert!(!PrimaryStore::exists(primary.as_ref(), &"d1".to_string()).await.unwrap());
        assert!(!CacheStore::exists(cache.as_ref(), &"d1".to_string()).await.unwrap());
        assert!(!SecondaryStore::exists(secondary.as_ref(), &"d1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn exists_short_circuits_on_cache_hit() {
        let (repo, _, cache, _) = full_memory_repo();
        CacheStore::set(cache.as_ref(), &doc("d1", "t"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(repo.exists(&"d1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn update_unknown_id_still_fans_out() {
        let (repo, primary, cache, secondary) = full_memory_repo();
        repo.update(&doc("ghost", "t1")).await.unwrap();

        // The primary no-opped, but the best-effort layers got a copy; the
        // cache entry ages out with its TTL.
        assert!(!PrimaryStore::exists(primary.as_ref(), &"ghost".to_string()).await.unwrap());
        assert!(CacheStore::exists(cache.as_ref(), &"ghost".to_string()).await.unwrap());
        assert!(SecondaryStore::exists(secondary.as_ref(), &"ghost".to_string()).await.unwrap());
    }

    // The crate-local `metrics` helpers shadow the `metrics` crate here,
    // so the recorder plumbing names the external crate explicitly.
    use ::metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

    /// Recorder that captures the names and labels of registered
    /// histograms, for asserting instrumentation without an exporter.
    #[derive(Default)]
    struct CapturingRecorder {
        histograms: parking_lot::Mutex<Vec<String>>,
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }
        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }
        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            let labels: Vec<String> = key
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            self.histograms
                .lock()
                .push(format!("{}{{{}}}", key.name(), labels.join(",")));
            Histogram::noop()
        }
    }

    #[test]
    fn operation_latency_histogram_is_emitted_per_tier() {
        let recorder = CapturingRecorder::default();

        ::metrics::with_local_recorder(&recorder, || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let (repo, _, _, _) = full_memory_repo();
                repo.add(&doc("d1", "t1")).await.unwrap();
                // Fan-out populated the cache, so this read is a cache hit.
                repo.get(&"d1".to_string()).await.unwrap();
                repo.delete(&"d1".to_string()).await.unwrap();
            });
        });

        let histograms = recorder.histograms.lock();
        let seen = |tier: &str, op: &str| {
            histograms.iter().any(|h| {
                h.starts_with("polysync_operation_seconds{")
                    && h.contains(&format!("tier={tier}"))
                    && h.contains(&format!("operation={op}"))
            })
        };
        assert!(seen("primary", "add"), "histograms: {histograms:?}");
        assert!(seen("cache", "get"), "histograms: {histograms:?}");
        assert!(seen("primary", "delete"), "histograms: {histograms:?}");
    }
}

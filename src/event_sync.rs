//! Event-driven propagation into the secondary store.
//!
//! Invoked right after a successful primary write to keep replication lag
//! low for the one entity that changed; the periodic reconciler remains
//! the safety net underneath. Unlike the composite repository's write
//! fan-out, failures here are logged and then *returned to the caller*:
//! this path exists precisely for call sites that want to observe and
//! react to replication failures (alerting, targeted retry), so
//! swallowing them would defeat the point.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::entity::Entity;
use crate::metrics;
use crate::status::{SyncStatus, SyncStatusTracker};
use crate::store::traits::{SecondaryStore, StoreError};

pub struct EventSyncService<E: Entity> {
    secondary: Arc<dyn SecondaryStore<E>>,
    tracker: Arc<SyncStatusTracker>,
}

impl<E: Entity> EventSyncService<E> {
    pub fn new(secondary: Arc<dyn SecondaryStore<E>>) -> Self {
        Self {
            secondary,
            tracker: Arc::new(SyncStatusTracker::new()),
        }
    }

    /// Share the tracker with health endpoints or a second service.
    pub fn with_tracker(secondary: Arc<dyn SecondaryStore<E>>, tracker: Arc<SyncStatusTracker>) -> Self {
        Self { secondary, tracker }
    }

    pub fn tracker(&self) -> Arc<SyncStatusTracker> {
        self.tracker.clone()
    }

    /// Propagate one changed entity into the secondary store: update if a
    /// copy exists, add otherwise. The attempt is recorded in the rolling
    /// status window either way, and errors propagate to the caller.
    pub async fn sync_entity(&self, entity: &E) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = self.propagate(entity).await;
        self.record(started, &result);

        match result {
            Ok(()) => {
                debug!(id = %entity.id(), "entity synced to secondary");
                Ok(())
            }
            Err(e) => {
                warn!(id = %entity.id(), error = %e, "event-driven sync failed");
                Err(e)
            }
        }
    }

    /// Remove an entity from the secondary store, with the same metrics
    /// recording and rethrow policy as [`sync_entity`](Self::sync_entity).
    pub async fn remove_entity(&self, id: &E::Id) -> Result<(), StoreError> {
        let started = Instant::now();
        let result = self.secondary.delete(id).await;
        self.record(started, &result);

        match result {
            Ok(()) => {
                debug!(id = %id, "entity removed from secondary");
                Ok(())
            }
            Err(e) => {
                warn!(id = %id, error = %e, "event-driven removal failed");
                Err(e)
            }
        }
    }

    /// Current health snapshot; both health conditions are recomputed on
    /// every call.
    pub fn status(&self) -> SyncStatus {
        self.tracker.snapshot()
    }

    async fn propagate(&self, entity: &E) -> Result<(), StoreError> {
        if self.secondary.exists(&entity.id()).await? {
            self.secondary.update(entity).await
        } else {
            self.secondary.add(entity).await
        }
    }

    fn record(&self, started: Instant, result: &Result<(), StoreError>) {
        let ok = result.is_ok();
        self.tracker.record(ok, started.elapsed());
        metrics::record_event_sync(if ok { "success" } else { "error" });
    }
}

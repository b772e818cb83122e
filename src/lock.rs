//! Cross-caller lock slot: best-effort mutual exclusion over named
//! resources.
//!
//! The registry is a process-wide concurrent map with insert-if-absent-
//! or-expired semantics per entry. TTL expiry is enforced by comparison
//! on every access, so the background purge sweep is pure housekeeping,
//! never correctness-critical. Contention is not an error: a busy
//! resource yields `None` and the caller decides what to do.
//!
//! Construct one slot at process start and stop its purge task on
//! shutdown; nothing here is a global.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics;
use crate::reconciler::cancellable_sleep;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock acquisition failed for resource '{0}'")]
    AcquisitionFailed(String),
}

/// State of one held lock. Owned exclusively by the registry; callers get
/// clones.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub resource: String,
    pub lock_id: String,
    pub owner_id: Option<String>,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl LockInfo {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// Proof of acquisition; presents the lock id back on release or extend.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub resource: String,
    pub lock_id: String,
}

#[derive(Debug, Default)]
pub struct LockSlot {
    locks: DashMap<String, LockInfo>,
}

impl LockSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `resource`. Succeeds when no live lock
    /// exists or the existing one has expired (which is atomically
    /// replaced). Live contention returns `None`, not an error.
    pub fn acquire(&self, resource: &str, ttl: Duration) -> Option<LockHandle> {
        self.acquire_as(resource, None, ttl)
    }

    /// [`acquire`](Self::acquire) with an owner id recorded for
    /// diagnostics.
    pub fn acquire_as(
        &self,
        resource: &str,
        owner_id: Option<&str>,
        ttl: Duration,
    ) -> Option<LockHandle> {
        let now = Instant::now();
        let info = LockInfo {
            resource: resource.to_string(),
            lock_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.map(str::to_string),
            acquired_at: now,
            expires_at: now + ttl,
        };
        let handle = LockHandle {
            resource: info.resource.clone(),
            lock_id: info.lock_id.clone(),
        };

        // The entry guard holds the shard lock, making the
        // check-then-replace atomic with respect to other acquirers.
        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(info);
                    metrics::record_lock_acquisition("replaced_expired");
                    debug!(resource, "acquired lock, replacing expired holder");
                    Some(handle)
                } else {
                    metrics::record_lock_acquisition("contended");
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(info);
                metrics::record_lock_acquisition("acquired");
                debug!(resource, "acquired lock");
                Some(handle)
            }
        }
    }

    /// Release only succeeds with the exact current lock id; anything
    /// else is a no-op returning `false`, so nobody can release a lock
    /// they don't hold.
    pub fn release(&self, resource: &str, lock_id: &str) -> bool {
        self.locks
            .remove_if(resource, |_, info| info.lock_id == lock_id)
            .is_some()
    }

    /// Push the expiry forward from now, only while still owned by
    /// `lock_id` and unexpired.
    pub fn extend(&self, resource: &str, lock_id: &str, extension: Duration) -> bool {
        match self.locks.entry(resource.to_string()) {
            Entry::Occupied(mut occupied) => {
                let info = occupied.get();
                if info.lock_id != lock_id || info.is_expired() {
                    return false;
                }
                occupied.get_mut().expires_at = Instant::now() + extension;
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Whether a live (unexpired) lock exists for the resource.
    pub fn is_locked(&self, resource: &str) -> bool {
        self.lock_info(resource).is_some()
    }

    /// Live lock state for the resource, if any. Expired entries read as
    /// unlocked and are dropped on the way.
    pub fn lock_info(&self, resource: &str) -> Option<LockInfo> {
        let info = self.locks.get(resource)?;
        if info.is_expired() {
            drop(info);
            self.locks.remove_if(resource, |_, i| i.is_expired());
            return None;
        }
        Some(info.clone())
    }

    /// Number of registry entries (expired ones included until purged).
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop expired entries. Called by the purge task; safe to call from
    /// anywhere.
    pub fn purge_expired(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, info| !info.is_expired());
        let purged = before - self.locks.len();
        metrics::set_locks_active(self.locks.len());
        purged
    }

    /// Spawn the periodic purge sweep; stop it through the shutdown
    /// channel during process teardown.
    pub fn start_purge(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if cancellable_sleep(&mut shutdown, interval).await {
                    break;
                }
                let purged = slot.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired lock entries");
                }
            }
            info!("lock purge task stopped");
        })
    }

    /// Scoped acquisition: acquire, run the action, release on every exit
    /// path. A contended resource yields
    /// [`LockError::AcquisitionFailed`] without running the action.
    ///
    /// Release runs from a drop guard, so it also fires when the returned
    /// future is dropped mid-action or the action panics.
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        action: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self
            .acquire(resource, ttl)
            .ok_or_else(|| LockError::AcquisitionFailed(resource.to_string()))?;
        let _guard = ReleaseOnDrop { slot: self, handle };

        Ok(action().await)
    }
}

struct ReleaseOnDrop<'a> {
    slot: &'a LockSlot,
    handle: LockHandle,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.slot.release(&self.handle.resource, &self.handle.lock_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn contended_then_expired_acquisition() {
        let slot = LockSlot::new();

        let first = slot.acquire("R", TTL).expect("free resource must lock");
        assert!(slot.acquire("R", TTL).is_none(), "live lock must contend");

        advance(Duration::from_secs(6)).await;

        let third = slot.acquire("R", TTL).expect("expired lock must be replaceable");
        assert_ne!(first.lock_id, third.lock_id, "new holder gets a new lock id");
    }

    #[tokio::test(start_paused = true)]
    async fn release_requires_exact_lock_id() {
        let slot = LockSlot::new();
        let handle = slot.acquire("R", TTL).unwrap();

        assert!(!slot.release("R", "not-the-id"));
        assert!(slot.is_locked("R"));

        assert!(slot.release("R", &handle.lock_id));
        assert!(!slot.is_locked("R"));
        // Double release is a no-op.
        assert!(!slot.release("R", &handle.lock_id));
    }

    #[tokio::test(start_paused = true)]
    async fn extend_only_while_owned_and_live() {
        let slot = LockSlot::new();
        let handle = slot.acquire("R", TTL).unwrap();

        assert!(!slot.extend("R", "wrong-id", TTL));
        assert!(slot.extend("R", &handle.lock_id, Duration::from_secs(30)));

        // Outlives the original TTL thanks to the extension.
        advance(Duration::from_secs(10)).await;
        assert!(slot.is_locked("R"));

        advance(Duration::from_secs(30)).await;
        assert!(!slot.extend("R", &handle.lock_id, TTL), "expired lock cannot be extended");
    }

    #[tokio::test(start_paused = true)]
    async fn lock_info_reports_owner_and_expiry() {
        let slot = LockSlot::new();
        slot.acquire_as("R", Some("worker-7"), TTL).unwrap();

        let info = slot.lock_info("R").unwrap();
        assert_eq!(info.resource, "R");
        assert_eq!(info.owner_id.as_deref(), Some("worker-7"));
        assert!(info.expires_at > info.acquired_at);

        advance(Duration::from_secs(6)).await;
        assert!(slot.lock_info("R").is_none(), "expired entry reads as unlocked");
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let slot = LockSlot::new();
        slot.acquire("short", Duration::from_secs(1)).unwrap();
        slot.acquire("long", Duration::from_secs(60)).unwrap();

        advance(Duration::from_secs(2)).await;

        assert_eq!(slot.purge_expired(), 1);
        assert_eq!(slot.len(), 1);
        assert!(slot.is_locked("long"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_runs_until_shutdown() {
        let slot = Arc::new(LockSlot::new());
        slot.acquire("R", Duration::from_secs(1)).unwrap();

        let (tx, rx) = watch::channel(false);
        let task = slot.start_purge(Duration::from_secs(5), rx);
        // Let the spawned task register its sleep before advancing the
        // paused clock; `advance` does not wake timers registered later.
        tokio::task::yield_now().await;

        advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(slot.len(), 0, "sweep removed the expired entry");

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn with_lock_releases_on_success() {
        let slot = LockSlot::new();

        let out = slot
            .with_lock("R", TTL, || async { 41 + 1 })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert!(!slot.is_locked("R"), "lock released after the action");
    }

    #[tokio::test(start_paused = true)]
    async fn with_lock_releases_when_action_errors() {
        let slot = LockSlot::new();

        let out: Result<Result<(), &str>, LockError> = slot
            .with_lock("R", TTL, || async { Err("domain failure") })
            .await;
        // The action's own error comes back, and the lock is still freed.
        assert!(out.unwrap().is_err());
        assert!(!slot.is_locked("R"));
    }

    #[tokio::test(start_paused = true)]
    async fn with_lock_releases_when_future_is_dropped() {
        let slot = Arc::new(LockSlot::new());
        let worker = slot.clone();
        let task = tokio::spawn(async move {
            worker
                .with_lock("R", TTL, || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                })
                .await
        });

        // Let the task acquire and park inside the action.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(slot.is_locked("R"), "action holds the lock while parked");

        task.abort();
        let _ = task.await;
        assert!(!slot.is_locked("R"), "dropping the future released the lock");
    }

    #[tokio::test(start_paused = true)]
    async fn with_lock_on_contended_resource_fails_distinguishably() {
        let slot = LockSlot::new();
        slot.acquire("R", TTL).unwrap();

        let result = slot.with_lock("R", TTL, || async {}).await;
        assert!(matches!(result, Err(LockError::AcquisitionFailed(_))));
    }

    #[tokio::test]
    async fn concurrent_acquirers_get_exactly_one_winner() {
        let slot = Arc::new(LockSlot::new());
        let mut handles = vec![];

        for _ in 0..16 {
            let slot = slot.clone();
            handles.push(tokio::spawn(async move {
                slot.acquire("R", Duration::from_secs(30)).is_some()
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

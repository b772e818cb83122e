//! Rolling sync-health tracking.
//!
//! The tracker keeps monotonic success/failure counters plus a bounded
//! ring of the most recent sample outcomes and latencies. Counters and
//! ring are mutated under a single mutex, and snapshots are taken under
//! the same mutex, so the health predicate never observes a torn state.
//! Nothing here is persisted; a process restart resets the window.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

/// Number of most-recent samples the health window retains.
pub const HEALTH_WINDOW: usize = 100;

/// Failure rate at or above which the tracker reports unhealthy.
pub const MAX_FAILURE_RATE: f64 = 0.05;

/// Average latency at or above which the tracker reports unhealthy.
pub const MAX_AVG_LATENCY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Sample {
    ok: bool,
    latency: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<Sample>,
    total_synced: u64,
    total_failed: u64,
    last_sync_time: Option<SystemTime>,
}

impl Inner {
    /// Health over the current window. Both conditions are derived from
    /// the live samples on every call, never cached, so failures aging
    /// out of the window restore health without a restart. An empty
    /// window is healthy: no evidence of failure.
    fn is_healthy(&self) -> bool {
        if self.samples.is_empty() {
            return true;
        }
        let failed = self.samples.iter().filter(|s| !s.ok).count();
        let failure_rate = failed as f64 / self.samples.len() as f64;
        failure_rate < MAX_FAILURE_RATE && self.average_latency() < MAX_AVG_LATENCY
    }

    fn average_latency(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().map(|s| s.latency).sum();
        total / self.samples.len() as u32
    }
}

/// Point-in-time view of the tracker, for the operational health surface.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<SystemTime>,
    pub total_synced: u64,
    pub total_failed: u64,
    pub average_latency_ms: f64,
    pub sample_count: usize,
    pub is_healthy: bool,
}

/// Shared rolling-metrics tracker for the event-driven sync path.
///
/// One instance per sync service; clone the `Arc` holding it to share
/// between the service and health endpoints.
#[derive(Debug, Default)]
pub struct SyncStatusTracker {
    inner: Mutex<Inner>,
}

impl SyncStatusTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sync attempt: bounded-FIFO append plus counter bump,
    /// all under the same exclusive section.
    pub fn record(&self, ok: bool, latency: Duration) {
        let healthy = {
            let mut inner = self.inner.lock();
            if inner.samples.len() == HEALTH_WINDOW {
                inner.samples.pop_front();
            }
            inner.samples.push_back(Sample { ok, latency });
            if ok {
                inner.total_synced += 1;
            } else {
                inner.total_failed += 1;
            }
            inner.last_sync_time = Some(SystemTime::now());
            inner.is_healthy()
        };
        crate::metrics::set_sync_healthy(healthy);
    }

    /// Snapshot the current status; health is recomputed on every call.
    pub fn snapshot(&self) -> SyncStatus {
        let inner = self.inner.lock();
        SyncStatus {
            last_sync_time: inner.last_sync_time,
            total_synced: inner.total_synced,
            total_failed: inner.total_failed,
            average_latency_ms: inner.average_latency().as_secs_f64() * 1000.0,
            sample_count: inner.samples.len(),
            is_healthy: inner.is_healthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Duration {
        Duration::from_millis(10)
    }

    #[test]
    fn empty_tracker_is_healthy() {
        let tracker = SyncStatusTracker::new();
        let status = tracker.snapshot();
        assert!(status.is_healthy);
        assert_eq!(status.total_synced, 0);
        assert_eq!(status.sample_count, 0);
        assert!(status.last_sync_time.is_none());
    }

    #[test]
    fn six_percent_failures_is_unhealthy() {
        let tracker = SyncStatusTracker::new();
        for _ in 0..94 {
            tracker.record(true, fast());
        }
        for _ in 0..6 {
            tracker.record(false, fast());
        }

        let status = tracker.snapshot();
        assert_eq!(status.sample_count, 100);
        assert!(!status.is_healthy, "6% failure rate must trip the health flag");
    }

    #[test]
    fn four_percent_failures_is_healthy() {
        let tracker = SyncStatusTracker::new();
        for _ in 0..96 {
            tracker.record(true, fast());
        }
        for _ in 0..4 {
            tracker.record(false, fast());
        }
        assert!(tracker.snapshot().is_healthy);
    }

    #[test]
    fn failures_aging_out_of_window_restore_health() {
        let tracker = SyncStatusTracker::new();
        for _ in 0..6 {
            tracker.record(false, fast());
        }
        for _ in 0..94 {
            tracker.record(true, fast());
        }
        assert!(!tracker.snapshot().is_healthy);

        // Push the failures out of the 100-sample window.
        for _ in 0..10 {
            tracker.record(true, fast());
        }

        let status = tracker.snapshot();
        assert!(status.is_healthy, "aged-out failures must stop counting");
        // Monotonic counters are unaffected by the window.
        assert_eq!(status.total_failed, 6);
        assert_eq!(status.total_synced, 104);
    }

    #[test]
    fn slow_average_latency_is_unhealthy() {
        let tracker = SyncStatusTracker::new();
        for _ in 0..10 {
            tracker.record(true, Duration::from_millis(1500));
        }
        let status = tracker.snapshot();
        assert!(!status.is_healthy);
        assert!(status.average_latency_ms >= 1000.0);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let tracker = SyncStatusTracker::new();
        for _ in 0..250 {
            tracker.record(true, fast());
        }
        let status = tracker.snapshot();
        assert_eq!(status.sample_count, HEALTH_WINDOW);
        assert_eq!(status.total_synced, 250);
    }
}

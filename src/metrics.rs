//! Metrics instrumentation for polysync.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! process picks the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `polysync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: primary, cache, secondary
//! - `operation`: get, add, update, delete, exists, browse, find
//! - `status`: success, error

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record a store operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "polysync_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record store operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "polysync_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a swallowed best-effort fan-out failure
pub fn record_fanout_failure(tier: &str, operation: &str) {
    counter!(
        "polysync_fanout_failures_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a cascading read falling through from one layer to the next
pub fn record_read_fallback(from: &str, to: &str) {
    counter!(
        "polysync_read_fallbacks_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a reconciliation sweep outcome (completed, skipped_empty, error)
pub fn record_reconcile_sweep(status: &str) {
    counter!(
        "polysync_reconcile_sweeps_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record per-entity reconciliation outcomes (synced, updated, failed)
pub fn record_reconcile_entities(outcome: &str, count: u64) {
    counter!(
        "polysync_reconcile_entities_total",
        "outcome" => outcome.to_string()
    )
    .increment(count);
}

/// Record an event-driven sync attempt
pub fn record_event_sync(status: &str) {
    counter!(
        "polysync_event_sync_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set the derived health flag of the sync status tracker
pub fn set_sync_healthy(healthy: bool) {
    gauge!("polysync_sync_healthy").set(if healthy { 1.0 } else { 0.0 });
}

/// Set the current number of live entries in the lock registry
pub fn set_locks_active(count: usize) {
    gauge!("polysync_locks_active").set(count as f64);
}

/// Record a lock acquisition attempt (acquired, contended, replaced_expired)
pub fn record_lock_acquisition(outcome: &str) {
    counter!(
        "polysync_lock_acquisitions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

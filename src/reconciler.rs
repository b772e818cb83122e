//! Background reconciliation sweep: pushes primary state into the
//! secondary store to repair drift.
//!
//! The sweep is the safety net under the event-driven sync path: it runs
//! on a fixed interval, copies every primary entity into the secondary
//! store (unconditional overwrite, no diffing), and survives per-entity
//! failures. It never deletes from the secondary, and it skips a sweep
//! entirely when the primary reports zero entities, so a transient empty
//! read can never masquerade as "nothing exists" and wipe replica state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::entity::Entity;
use crate::metrics;
use crate::store::traits::{PrimaryStore, SecondaryStore, StoreError};

/// Aggregate result of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entities absent from the secondary store and added
    pub synced: u64,
    /// Entities already present and unconditionally refreshed
    pub updated: u64,
    /// Entities whose propagation failed (logged, sweep continued)
    pub failed: u64,
    /// Total entities the primary reported
    pub total: u64,
}

pub struct Reconciler<E: Entity> {
    primary: Arc<dyn PrimaryStore<E>>,
    secondary: Arc<dyn SecondaryStore<E>>,
    config: SyncConfig,
    shutdown: watch::Receiver<bool>,
}

impl<E: Entity> Reconciler<E> {
    pub fn new(
        primary: Arc<dyn PrimaryStore<E>>,
        secondary: Arc<dyn SecondaryStore<E>>,
        config: SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// The reconciliation loop. Runs until the shutdown channel fires;
    /// every wait is cancellable, and in-flight per-entity writes are
    /// allowed to finish so the secondary is never left half-written for
    /// a given entity.
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("reconciler disabled by config");
            return;
        }

        // Warm-up: don't race primary-store bootstrap.
        if cancellable_sleep(&mut self.shutdown, self.config.initial_delay()).await {
            return;
        }

        info!(
            interval_ms = self.config.sync_interval_ms,
            "reconciler started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let delay = match self.sweep_once().await {
                Ok(report) => {
                    info!(
                        synced = report.synced,
                        updated = report.updated,
                        failed = report.failed,
                        total = report.total,
                        "reconciliation sweep complete"
                    );
                    self.config.sync_interval()
                }
                Err(e) => {
                    // Batch-level failure, e.g. primary unreachable for the
                    // whole listing. Back off and try again, indefinitely.
                    error!(error = %e, "reconciliation sweep failed");
                    metrics::record_reconcile_sweep("error");
                    self.config.retry_delay()
                }
            };

            if cancellable_sleep(&mut self.shutdown, delay).await {
                break;
            }
        }

        info!("reconciler stopped");
    }

    /// One full sweep of primary → secondary. Public so operational
    /// tooling can trigger an out-of-band reconciliation.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let entities = self.primary.browse_all().await?;

        if entities.is_empty() {
            // An empty primary read may be transient; overwriting replica
            // state on its basis is never worth it.
            info!("primary returned no entities, skipping sweep");
            metrics::record_reconcile_sweep("skipped_empty");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport {
            total: entities.len() as u64,
            ..Default::default()
        };

        for entity in &entities {
            if *self.shutdown.borrow() {
                // Cooperative exit between entities; partial progress
                // stands, the next sweep finishes the rest.
                break;
            }

            match self.reconcile_entity(entity).await {
                Ok(true) => report.synced += 1,
                Ok(false) => report.updated += 1,
                Err(e) => {
                    warn!(id = %entity.id(), error = %e, "failed to reconcile entity");
                    report.failed += 1;
                }
            }
        }

        metrics::record_reconcile_sweep("completed");
        metrics::record_reconcile_entities("synced", report.synced);
        metrics::record_reconcile_entities("updated", report.updated);
        metrics::record_reconcile_entities("failed", report.failed);
        Ok(report)
    }

    /// Returns `Ok(true)` when the entity was newly added to the
    /// secondary, `Ok(false)` when an existing copy was refreshed.
    async fn reconcile_entity(&self, entity: &E) -> Result<bool, StoreError> {
        if self.secondary.exists(&entity.id()).await? {
            // Unconditional overwrite: simplicity over a dirty-check.
            self.secondary.update(entity).await?;
            Ok(false)
        } else {
            self.secondary.add(entity).await?;
            Ok(true)
        }
    }
}

/// Sleep that aborts early on shutdown. Returns `true` when shutdown was
/// signalled (or the sender dropped) during the wait.
pub(crate) async fn cancellable_sleep(shutdown: &mut watch::Receiver<bool>, dur: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = sleep(dur) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

//! Scheduler background worker.
//!
//! Runs one scheduling tick per interval. Ticks run inline in the worker's
//! task, so two ticks never overlap.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use super::provisioner::{TickOutcome, ZoneScheduler};

/// Scheduler worker that drives [`ZoneScheduler`].
pub struct SchedulerWorker {
    scheduler: ZoneScheduler,
    interval: Duration,
}

impl SchedulerWorker {
    pub fn new(scheduler: ZoneScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting scheduler worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        match self.scheduler.run_tick().await {
            Ok(TickOutcome::Idle) => {}
            Ok(TickOutcome::Placed {
                zone_id,
                node_id,
                address,
            }) => info!(
                zone_id = %zone_id,
                node_id = %node_id,
                address = %address,
                "Scheduler tick placed zone"
            ),
            Ok(TickOutcome::RolledBack { zone_id, reason }) => info!(
                zone_id = %zone_id,
                reason = %reason,
                "Scheduler tick rolled back zone"
            ),
            Ok(TickOutcome::Contended { zone_id }) => info!(
                zone_id = %zone_id,
                "Scheduler tick lost claim race"
            ),
            Err(e) => error!(error = %e, "Scheduler tick failed"),
        }
    }
}

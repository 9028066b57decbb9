//! Reconciliation background worker.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use super::NodeReconciler;

/// Runs [`NodeReconciler::reconcile_all`] on a fixed interval.
pub struct ReconcileWorker {
    reconciler: NodeReconciler,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: NodeReconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run until shutdown is signaled. Passes never overlap.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconciler.reconcile_all().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

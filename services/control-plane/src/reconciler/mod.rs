//! Reconciliation loop.
//!
//! For every node: ping it and record its health, then list its zones and
//! bring each known zone's status in line with what the node reports. A
//! failure on one node or in one check is logged and the sweep moves on.

mod worker;

pub use worker::ReconcileWorker;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use zonefleet_id::ZoneId;

use crate::models::{Node, NodeHealth, ZoneStatus};
use crate::node::{ListedZone, NodeClient};
use crate::repository::{Repository, RepositoryResult};

/// Canonical status for a remote zone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMapping {
    pub status: ZoneStatus,
    /// False when the state was missing or unknown and `Stopped` was assumed.
    pub recognized: bool,
}

/// Map a node's free-text zone state to a [`ZoneStatus`].
///
/// `running` is `Running`; `installed`, `configured`, `stopped` and `ready`
/// are `Stopped`. Anything else, including no state at all, is treated as
/// `Stopped` and flagged as unrecognized. Matching ignores case.
pub fn map_remote_state(state: Option<&str>) -> StateMapping {
    let Some(state) = state else {
        return StateMapping {
            status: ZoneStatus::Stopped,
            recognized: false,
        };
    };

    match state.to_ascii_lowercase().as_str() {
        "running" => StateMapping {
            status: ZoneStatus::Running,
            recognized: true,
        },
        "installed" | "configured" | "stopped" | "ready" => StateMapping {
            status: ZoneStatus::Stopped,
            recognized: true,
        },
        _ => StateMapping {
            status: ZoneStatus::Stopped,
            recognized: false,
        },
    }
}

/// Statistics from a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub nodes_checked: usize,
    pub nodes_online: usize,
    pub nodes_offline: usize,
    pub health_updates: usize,
    pub zones_updated: usize,
    /// Checks that failed and were skipped.
    pub failures: usize,
}

/// Converges persisted node health and zone status with the fleet.
pub struct NodeReconciler {
    repository: Arc<dyn Repository>,
    nodes: Arc<dyn NodeClient>,
}

impl NodeReconciler {
    pub fn new(repository: Arc<dyn Repository>, nodes: Arc<dyn NodeClient>) -> Self {
        Self { repository, nodes }
    }

    /// Run a single reconciliation pass over every node.
    ///
    /// Only failing to list the nodes is an error; everything after that is
    /// counted in [`ReconcileStats::failures`].
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> RepositoryResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let fleet = self.repository.list_nodes_with_usage().await?;
        debug!(node_count = fleet.len(), "Found nodes to reconcile");

        for entry in &fleet {
            stats.nodes_checked += 1;
            self.check_health(&entry.node, &mut stats).await;
            self.check_zones(&entry.node, &mut stats).await;
        }

        info!(
            nodes_checked = stats.nodes_checked,
            nodes_online = stats.nodes_online,
            nodes_offline = stats.nodes_offline,
            health_updates = stats.health_updates,
            zones_updated = stats.zones_updated,
            failures = stats.failures,
            "Reconciliation pass complete"
        );

        Ok(stats)
    }

    async fn check_health(&self, node: &Node, stats: &mut ReconcileStats) {
        let health = match self.nodes.ping(node).await {
            Ok(()) => NodeHealth::Online,
            Err(e) => {
                debug!(node_id = %node.id, error = %e, "Node ping failed");
                NodeHealth::Offline
            }
        };

        match health {
            NodeHealth::Online => stats.nodes_online += 1,
            NodeHealth::Offline => stats.nodes_offline += 1,
        }

        if node.health == Some(health) {
            return;
        }

        match self.repository.update_node_health(node.id, health).await {
            Ok(()) => {
                stats.health_updates += 1;
                info!(
                    node_id = %node.id,
                    previous = ?node.health,
                    health = %health,
                    "Node health changed"
                );
            }
            Err(e) => {
                stats.failures += 1;
                warn!(node_id = %node.id, error = %e, "Failed to record node health");
            }
        }
    }

    async fn check_zones(&self, node: &Node, stats: &mut ReconcileStats) {
        let listed = match self.nodes.list_zones(node).await {
            Ok(listed) => listed,
            Err(e) => {
                stats.failures += 1;
                warn!(node_id = %node.id, error = %e, "Failed to list zones on node");
                return;
            }
        };
        debug!(node_id = %node.id, zone_count = listed.len(), "Listed zones on node");

        if let Err(e) = self.apply_listing(node, &listed, stats).await {
            stats.failures += 1;
            warn!(node_id = %node.id, error = %e, "Failed to reconcile zones on node");
        }
    }

    async fn apply_listing(
        &self,
        node: &Node,
        listed: &[ListedZone],
        stats: &mut ReconcileStats,
    ) -> RepositoryResult<()> {
        let ids: Vec<ZoneId> = listed
            .iter()
            .filter_map(|zone| match zone.id.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!(node_id = %node.id, zone_name = %zone.id, "Ignoring unmanaged zone");
                    None
                }
            })
            .collect();

        let known = self.repository.find_zones_by_ids(&ids).await?;

        for zone in known {
            // zones still being placed belong to the scheduler
            if !zone.status.is_provisioned() {
                continue;
            }

            let zone_name = zone.id.to_string();
            let Some(remote) = listed.iter().find(|l| l.id == zone_name) else {
                continue;
            };

            let mapping = map_remote_state(remote.state.as_deref());
            if !mapping.recognized {
                warn!(
                    zone_id = %zone.id,
                    node_id = %node.id,
                    state = remote.state.as_deref().unwrap_or("<none>"),
                    "Unknown zone state, assuming stopped"
                );
            }

            if zone.status == mapping.status {
                continue;
            }

            match self
                .repository
                .update_zone_status(zone.id, mapping.status)
                .await
            {
                Ok(()) => {
                    stats.zones_updated += 1;
                    info!(
                        zone_id = %zone.id,
                        previous = %zone.status,
                        status = %mapping.status,
                        "Zone status reconciled"
                    );
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!(zone_id = %zone.id, error = %e, "Failed to update zone status");
                }
            }
        }

        Ok(())
    }
}

//! Boot and stop for provisioned zones.

use std::sync::Arc;

use tracing::{info, instrument};
use zonefleet_id::ZoneId;

use crate::models::{Node, Zone, ZoneStatus};
use crate::node::{NodeClient, NodeError};
use crate::repository::{Repository, RepositoryError};

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The zone has not been provisioned on a node yet.
    #[error("zone {zone_id} is {status} and not placed on a node")]
    NotPlaced { zone_id: ZoneId, status: ZoneStatus },

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Explicit boot and stop of zones the scheduler has provisioned.
pub struct ZoneLifecycle {
    repository: Arc<dyn Repository>,
    nodes: Arc<dyn NodeClient>,
}

impl ZoneLifecycle {
    pub fn new(repository: Arc<dyn Repository>, nodes: Arc<dyn NodeClient>) -> Self {
        Self { repository, nodes }
    }

    /// Boot the zone and record it as `Running`.
    #[instrument(skip(self))]
    pub async fn boot_zone(&self, zone_id: ZoneId) -> LifecycleResult<Zone> {
        let (mut zone, node) = self.locate(zone_id).await?;
        self.nodes.boot_zone(&node, &zone.id).await?;
        self.repository
            .update_zone_status(zone.id, ZoneStatus::Running)
            .await?;

        info!(zone_id = %zone.id, node_id = %node.id, "Zone booted");
        zone.status = ZoneStatus::Running;
        Ok(zone)
    }

    /// Shut the zone down and record it as `Stopped`.
    #[instrument(skip(self))]
    pub async fn stop_zone(&self, zone_id: ZoneId) -> LifecycleResult<Zone> {
        let (mut zone, node) = self.locate(zone_id).await?;
        self.nodes.stop_zone(&node, &zone.id).await?;
        self.repository
            .update_zone_status(zone.id, ZoneStatus::Stopped)
            .await?;

        info!(zone_id = %zone.id, node_id = %node.id, "Zone stopped");
        zone.status = ZoneStatus::Stopped;
        Ok(zone)
    }

    async fn locate(&self, zone_id: ZoneId) -> LifecycleResult<(Zone, Node)> {
        let zone = self.repository.find_zone(zone_id).await?;
        let node_id = match (zone.status.is_provisioned(), zone.node_id) {
            (true, Some(node_id)) => node_id,
            _ => {
                return Err(LifecycleError::NotPlaced {
                    zone_id,
                    status: zone.status,
                })
            }
        };
        let node = self.repository.find_node(node_id).await?;
        Ok((zone, node))
    }
}

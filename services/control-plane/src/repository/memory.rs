//! Repository held entirely in process memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use zonefleet_id::{NodeId, ZoneId};

use super::{Repository, RepositoryError, RepositoryResult};
use crate::models::{Node, NodeHealth, NodeWithZones, Placement, Zone, ZoneStatus};

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<NodeId, Node>,
    zones: BTreeMap<ZoneId, Zone>,
}

impl Tables {
    fn zone_mut(&mut self, id: ZoneId) -> RepositoryResult<&mut Zone> {
        self.zones
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::zone_not_found(id))
    }
}

/// [`Repository`] backed by maps behind one lock.
///
/// Every operation holds the lock for its whole duration, which makes
/// `claim_zone` a single check-and-set.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_node(&self, node: Node) {
        self.tables.lock().await.nodes.insert(node.id, node);
    }

    pub async fn insert_zone(&self, zone: Zone) {
        self.tables.lock().await.zones.insert(zone.id, zone);
    }

    /// Snapshot of one zone.
    pub async fn zone(&self, id: ZoneId) -> Option<Zone> {
        self.tables.lock().await.zones.get(&id).cloned()
    }

    /// Snapshot of one node.
    pub async fn node(&self, id: NodeId) -> Option<Node> {
        self.tables.lock().await.nodes.get(&id).cloned()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_oldest_pending_zone(&self) -> RepositoryResult<Option<Zone>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .zones
            .values()
            .filter(|zone| zone.status == ZoneStatus::Unscheduled && zone.node_id.is_none())
            .min_by_key(|zone| (zone.updated_at, zone.id))
            .cloned())
    }

    async fn claim_zone(&self, id: ZoneId) -> RepositoryResult<Zone> {
        let mut tables = self.tables.lock().await;
        let zone = tables.zone_mut(id)?;

        if zone.status != ZoneStatus::Unscheduled || zone.node_id.is_some() {
            return Err(RepositoryError::ClaimConflict {
                zone_id: id,
                expected: ZoneStatus::Unscheduled,
                actual: zone.status,
            });
        }

        zone.status = ZoneStatus::Scheduling;
        zone.updated_at = Utc::now();
        Ok(zone.clone())
    }

    async fn commit_placement(&self, id: ZoneId, placement: &Placement) -> RepositoryResult<()> {
        let mut tables = self.tables.lock().await;
        let zone = tables.zone_mut(id)?;

        if zone.status != ZoneStatus::Scheduling {
            return Err(RepositoryError::ClaimConflict {
                zone_id: id,
                expected: ZoneStatus::Scheduling,
                actual: zone.status,
            });
        }

        zone.node_id = Some(placement.node_id);
        zone.internal_ip_address = Some(placement.address);
        zone.path = Some(placement.path.clone());
        zone.vnic = Some(placement.vnic.clone());
        zone.ip_type = Some(placement.ip_type.clone());
        zone.brand = Some(placement.brand.clone());
        zone.status = ZoneStatus::Stopped;
        zone.updated_at = Utc::now();
        Ok(())
    }

    async fn revert_to_unscheduled(&self, id: ZoneId) -> RepositoryResult<()> {
        let mut tables = self.tables.lock().await;
        let zone = tables.zone_mut(id)?;

        zone.node_id = None;
        zone.internal_ip_address = None;
        zone.path = None;
        zone.vnic = None;
        zone.ip_type = None;
        zone.status = ZoneStatus::Unscheduled;
        zone.updated_at = Utc::now();
        Ok(())
    }

    async fn list_nodes_with_usage(&self) -> RepositoryResult<Vec<NodeWithZones>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .nodes
            .values()
            .map(|node| NodeWithZones {
                node: node.clone(),
                zones: tables
                    .zones
                    .values()
                    .filter(|zone| zone.node_id == Some(node.id))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn update_node_health(&self, id: NodeId, health: NodeHealth) -> RepositoryResult<()> {
        let mut tables = self.tables.lock().await;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::node_not_found(id))?;
        node.health = Some(health);
        Ok(())
    }

    async fn find_zones_by_ids(&self, ids: &[ZoneId]) -> RepositoryResult<Vec<Zone>> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.zones.get(id).cloned())
            .collect())
    }

    async fn update_zone_status(&self, id: ZoneId, status: ZoneStatus) -> RepositoryResult<()> {
        let mut tables = self.tables.lock().await;
        let zone = tables.zone_mut(id)?;
        zone.status = status;
        zone.updated_at = Utc::now();
        Ok(())
    }

    async fn find_zone(&self, id: ZoneId) -> RepositoryResult<Zone> {
        self.zone(id)
            .await
            .ok_or_else(|| RepositoryError::zone_not_found(id))
    }

    async fn find_node(&self, id: NodeId) -> RepositoryResult<Node> {
        self.node(id)
            .await
            .ok_or_else(|| RepositoryError::node_not_found(id))
    }
}

//! In-process node client for tests and local development.
//!
//! Records every call and keeps a per-node table of zones and VNICs so that
//! a provisioned zone shows up in later listings.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use zonefleet_id::{NodeId, ZoneId};

use super::client::NodeClient;
use super::error::{NodeError, NodeResult};
use super::models::{ListedZone, PhysicalZone, Vnic};
use crate::models::{Node, Service};

/// Operations the mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOperation {
    Ping,
    ListZones,
    GetZones,
    GetZone,
    ListZone,
    CreateVnic,
    DeleteVnic,
    CreateZone,
    BootZone,
    StopZone,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    Ping(NodeId),
    ListZones(NodeId),
    GetZones(NodeId),
    GetZone(NodeId, ZoneId),
    ListZone(NodeId, ZoneId),
    CreateVnic(NodeId, Vnic),
    DeleteVnic(NodeId, String),
    CreateZone {
        node_id: NodeId,
        zone_name: String,
        image_uri: String,
        services: usize,
    },
    BootZone(NodeId, ZoneId),
    StopZone(NodeId, ZoneId),
}

impl NodeCall {
    pub fn operation(&self) -> NodeOperation {
        match self {
            Self::Ping(_) => NodeOperation::Ping,
            Self::ListZones(_) => NodeOperation::ListZones,
            Self::GetZones(_) => NodeOperation::GetZones,
            Self::GetZone(..) => NodeOperation::GetZone,
            Self::ListZone(..) => NodeOperation::ListZone,
            Self::CreateVnic(..) => NodeOperation::CreateVnic,
            Self::DeleteVnic(..) => NodeOperation::DeleteVnic,
            Self::CreateZone { .. } => NodeOperation::CreateZone,
            Self::BootZone(..) => NodeOperation::BootZone,
            Self::StopZone(..) => NodeOperation::StopZone,
        }
    }
}

#[derive(Default)]
struct NodeState {
    zones: BTreeMap<String, (PhysicalZone, ListedZone)>,
    vnics: HashSet<String>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<NodeCall>,
    nodes: HashMap<NodeId, NodeState>,
    unreachable: HashSet<NodeId>,
    failing: HashSet<NodeOperation>,
}

/// Mock [`NodeClient`].
#[derive(Default)]
pub struct MockNodeClient {
    state: Mutex<MockState>,
}

impl MockNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against `node_id` fail with `NodeUnreachable`.
    pub async fn set_unreachable(&self, node_id: NodeId, unreachable: bool) {
        let mut state = self.state.lock().await;
        if unreachable {
            state.unreachable.insert(node_id);
        } else {
            state.unreachable.remove(&node_id);
        }
    }

    /// Make `operation` fail with `RemoteCommandFailed` on every node.
    pub async fn fail(&self, operation: NodeOperation) {
        self.state.lock().await.failing.insert(operation);
    }

    /// Seed the zone listing reported by `node_id`.
    pub async fn set_listed_zones(&self, node_id: NodeId, zones: Vec<ListedZone>) {
        let mut state = self.state.lock().await;
        let node = state.nodes.entry(node_id).or_default();
        node.zones = zones
            .into_iter()
            .map(|listed| {
                let physical = PhysicalZone {
                    zonename: listed.id.clone(),
                    brand: listed.brand.clone(),
                    ..Default::default()
                };
                (listed.id.clone(), (physical, listed))
            })
            .collect();
    }

    /// Change the reported state of one zone.
    pub async fn set_zone_state(&self, node_id: NodeId, zone_name: &str, zone_state: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some((_, listed)) = state
            .nodes
            .get_mut(&node_id)
            .and_then(|node| node.zones.get_mut(zone_name))
        {
            listed.state = zone_state.map(str::to_string);
        }
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<NodeCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls of one kind.
    pub async fn calls_to(&self, operation: NodeOperation) -> Vec<NodeCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| call.operation() == operation)
            .collect()
    }

    /// VNICs currently present on `node_id`.
    pub async fn vnics(&self, node_id: NodeId) -> HashSet<String> {
        self.state
            .lock()
            .await
            .nodes
            .get(&node_id)
            .map(|node| node.vnics.clone())
            .unwrap_or_default()
    }

    /// Record `call` and decide whether it fails.
    async fn enter(&self, node: &Node, call: NodeCall) -> NodeResult<tokio::sync::MutexGuard<'_, MockState>> {
        let operation = call.operation();
        let mut state = self.state.lock().await;
        state.calls.push(call);

        if state.unreachable.contains(&node.id) {
            return Err(NodeError::NodeUnreachable {
                address: node.connection.address.clone(),
                message: "mock node unreachable".to_string(),
            });
        }
        if state.failing.contains(&operation) {
            return Err(NodeError::RemoteCommandFailed {
                exit_code: 1,
                stderr: format!("mock {operation:?} failure"),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn ping(&self, node: &Node) -> NodeResult<()> {
        self.enter(node, NodeCall::Ping(node.id)).await?;
        Ok(())
    }

    async fn list_zones(&self, node: &Node) -> NodeResult<Vec<ListedZone>> {
        let state = self.enter(node, NodeCall::ListZones(node.id)).await?;
        Ok(state
            .nodes
            .get(&node.id)
            .map(|n| n.zones.values().map(|(_, listed)| listed.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_zones(&self, node: &Node) -> NodeResult<Vec<PhysicalZone>> {
        let state = self.enter(node, NodeCall::GetZones(node.id)).await?;
        Ok(state
            .nodes
            .get(&node.id)
            .map(|n| n.zones.values().map(|(zone, _)| zone.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<PhysicalZone> {
        let state = self.enter(node, NodeCall::GetZone(node.id, *zone_id)).await?;
        let name = zone_id.to_string();
        state
            .nodes
            .get(&node.id)
            .and_then(|n| n.zones.get(&name))
            .map(|(zone, _)| zone.clone())
            .ok_or(NodeError::ZoneNotFound(name))
    }

    async fn list_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<ListedZone> {
        let state = self.enter(node, NodeCall::ListZone(node.id, *zone_id)).await?;
        let name = zone_id.to_string();
        state
            .nodes
            .get(&node.id)
            .and_then(|n| n.zones.get(&name))
            .map(|(_, listed)| listed.clone())
            .ok_or(NodeError::ZoneNotFound(name))
    }

    async fn create_vnic(&self, node: &Node, vnic: &Vnic) -> NodeResult<Vnic> {
        let mut state = self
            .enter(node, NodeCall::CreateVnic(node.id, vnic.clone()))
            .await?;
        state
            .nodes
            .entry(node.id)
            .or_default()
            .vnics
            .insert(vnic.link.clone());
        info!(node_id = %node.id, link = %vnic.link, "[MOCK] VNIC created");
        Ok(vnic.clone())
    }

    async fn delete_vnic(&self, node: &Node, link: &str) -> NodeResult<()> {
        let mut state = self
            .enter(node, NodeCall::DeleteVnic(node.id, link.to_string()))
            .await?;
        if let Some(n) = state.nodes.get_mut(&node.id) {
            n.vnics.remove(link);
        }
        info!(node_id = %node.id, link, "[MOCK] VNIC deleted");
        Ok(())
    }

    async fn create_zone(
        &self,
        node: &Node,
        zone: &PhysicalZone,
        image_uri: &str,
        services: &[Service],
    ) -> NodeResult<PhysicalZone> {
        let call = NodeCall::CreateZone {
            node_id: node.id,
            zone_name: zone.zonename.clone(),
            image_uri: image_uri.to_string(),
            services: services.len(),
        };
        let mut state = self.enter(node, call).await?;
        if services.len() != 1 {
            return Err(NodeError::UnsupportedServiceCount(services.len()));
        }

        let listed = ListedZone {
            id: zone.zonename.clone(),
            brand: zone.brand.clone(),
            cpus: zone
                .capped_cpu
                .map(|cpu| cpu.ncpus.to_string())
                .unwrap_or_default(),
            ram: zone
                .capped_memory
                .as_ref()
                .map(|mem| mem.physical.clone())
                .unwrap_or_default(),
            state: Some("installed".to_string()),
        };
        state
            .nodes
            .entry(node.id)
            .or_default()
            .zones
            .insert(zone.zonename.clone(), (zone.clone(), listed));

        info!(node_id = %node.id, zone_name = %zone.zonename, "[MOCK] Zone created");
        Ok(zone.clone())
    }

    async fn boot_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()> {
        let state = self.enter(node, NodeCall::BootZone(node.id, *zone_id)).await?;
        drop(state);
        self.set_zone_state(node.id, &zone_id.to_string(), Some("running"))
            .await;
        Ok(())
    }

    async fn stop_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()> {
        let state = self.enter(node, NodeCall::StopZone(node.id, *zone_id)).await?;
        drop(state);
        self.set_zone_state(node.id, &zone_id.to_string(), Some("installed"))
            .await;
        Ok(())
    }
}

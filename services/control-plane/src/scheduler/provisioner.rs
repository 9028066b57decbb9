//! One scheduling tick.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use zonefleet_id::{NodeId, ZoneId};
use zonefleet_networking::{next_available_in, vnic_link_name, Ipv4Cidr};

use super::saga::{Compensation, Saga};
use super::{SchedulerConfig, SchedulerError, SchedulerResult};
use crate::models::{Node, Placement, Zone};
use crate::node::{
    CappedCpu, CappedMemory, NodeClient, PhysicalZone, Vnic, ZoneNet, IP_TYPE_EXCLUSIVE,
};
use crate::placement::find_optimal_node;
use crate::repository::{Repository, RepositoryError};

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No zone was waiting.
    Idle,

    /// The zone was provisioned and committed as `Stopped`.
    Placed {
        zone_id: ZoneId,
        node_id: NodeId,
        address: Ipv4Addr,
    },

    /// Placement or provisioning failed; the zone is `Unscheduled` again.
    RolledBack { zone_id: ZoneId, reason: String },

    /// Another tick claimed the zone first.
    Contended { zone_id: ZoneId },
}

/// Places pending zones, one per tick.
pub struct ZoneScheduler {
    repository: Arc<dyn Repository>,
    nodes: Arc<dyn NodeClient>,
    config: SchedulerConfig,
}

impl ZoneScheduler {
    pub fn new(
        repository: Arc<dyn Repository>,
        nodes: Arc<dyn NodeClient>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            nodes,
            config,
        }
    }

    /// Run one tick.
    ///
    /// Placement and provisioning failures are handled here and reported as
    /// [`TickOutcome::RolledBack`]. An `Err` means the repository itself
    /// failed: finding or claiming the zone, rolling it back, or committing
    /// a zone that was already created on its node.
    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> SchedulerResult<TickOutcome> {
        let Some(pending) = self.repository.find_oldest_pending_zone().await? else {
            debug!("No unscheduled zones to place");
            return Ok(TickOutcome::Idle);
        };

        let zone = match self.repository.claim_zone(pending.id).await {
            Ok(zone) => zone,
            Err(RepositoryError::ClaimConflict { zone_id, actual, .. }) => {
                info!(zone_id = %zone_id, status = %actual, "Zone already claimed");
                return Ok(TickOutcome::Contended { zone_id });
            }
            Err(e) => return Err(e.into()),
        };
        info!(zone_id = %zone.id, "Scheduling zone");

        let placement = match self.place(&zone).await {
            Ok(placement) => placement,
            Err(e) => {
                warn!(zone_id = %zone.id, error = %e, "Placement failed, returning zone to queue");
                self.repository.revert_to_unscheduled(zone.id).await?;
                return Ok(TickOutcome::RolledBack {
                    zone_id: zone.id,
                    reason: e.to_string(),
                });
            }
        };

        self.repository
            .commit_placement(zone.id, &placement)
            .await?;

        info!(
            zone_id = %zone.id,
            node_id = %placement.node_id,
            address = %placement.address,
            vnic = %placement.vnic,
            "Zone provisioned"
        );

        Ok(TickOutcome::Placed {
            zone_id: zone.id,
            node_id: placement.node_id,
            address: placement.address,
        })
    }

    /// Choose a node and address, then provision the zone there.
    async fn place(&self, zone: &Zone) -> SchedulerResult<Placement> {
        let fleet = self.repository.list_nodes_with_usage().await?;
        let target = find_optimal_node(&zone.resources, &fleet).ok_or(SchedulerError::NoEligibleNode)?;
        let node = &target.node;
        info!(zone_id = %zone.id, node_id = %node.id, "Found node for zone");

        let network = Ipv4Cidr::from_cidr(&node.network.private_zone_network)?;
        let used: HashSet<Ipv4Addr> = target.used_addresses().collect();
        let address =
            next_available_in(&network, &used).ok_or_else(|| SchedulerError::AddressSpaceExhausted {
                node_id: node.id,
                network: network.to_string(),
            })?;
        debug!(zone_id = %zone.id, address = %address, "Allocated address");

        let mut saga = Saga::new(self.nodes.as_ref(), node);
        let provisioned = self.provision(&mut saga, zone, node, &network, address).await;

        if provisioned.is_err() {
            let failed = saga.compensate().await;
            if failed > 0 {
                warn!(zone_id = %zone.id, failed, "Rollback left remote state behind");
            }
        }

        provisioned
    }

    /// Remote steps. Each one registers its undo with `saga` once it has
    /// succeeded.
    async fn provision(
        &self,
        saga: &mut Saga<'_>,
        zone: &Zone,
        node: &Node,
        network: &Ipv4Cidr,
        address: Ipv4Addr,
    ) -> SchedulerResult<Placement> {
        let requested = Vnic {
            link: vnic_link_name(&zone.id.to_string()),
            over: node.network.internal_stub_device.clone(),
        };
        let vnic = self.nodes.create_vnic(node, &requested).await?;
        saga.record(Compensation::DeleteVnic {
            link: vnic.link.clone(),
        });

        let descriptor = self.descriptor(zone, node, network, address, &vnic);
        let created = self
            .nodes
            .create_zone(node, &descriptor, &zone.image_uri, &zone.services)
            .await?;

        Ok(Placement {
            node_id: node.id,
            address,
            path: created.zonepath,
            vnic: vnic.link,
            ip_type: created.ip_type,
            brand: created.brand,
        })
    }

    /// Zone configuration staged on the node.
    fn descriptor(
        &self,
        zone: &Zone,
        node: &Node,
        network: &Ipv4Cidr,
        address: Ipv4Addr,
        vnic: &Vnic,
    ) -> PhysicalZone {
        let zone_name = zone.id.to_string();
        let base = node.network.zone_base_path.trim_end_matches('/');

        PhysicalZone {
            brand: zone
                .brand
                .clone()
                .unwrap_or_else(|| self.config.default_brand.clone()),
            zonepath: format!("{base}/{zone_name}"),
            zonename: zone_name,
            ip_type: IP_TYPE_EXCLUSIVE.to_string(),
            capped_cpu: Some(CappedCpu {
                ncpus: zone.resources.cpu_count,
            }),
            capped_memory: Some(CappedMemory {
                physical: format!("{}G", zone.resources.ram_gb),
            }),
            net: vec![ZoneNet {
                allowed_address: Some(network.host_cidr(address)),
                defrouter: Some(node.network.default_router.clone()),
                physical: vnic.link.clone(),
            }],
            resolvers: Some(self.config.resolvers.clone()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use zonefleet_id::ServiceId;

    use super::*;
    use crate::models::{
        NodeConnection, NodeHealth, NodeNetwork, Resources, Service, ZoneStatus,
    };
    use crate::node::{MockNodeClient, NodeCall, NodeOperation, PrivateKey};
    use crate::repository::InMemoryRepository;

    fn node(network: &str) -> Node {
        Node {
            id: NodeId::new(),
            connection: NodeConnection {
                address: "10.0.0.10".to_string(),
                port: 22,
                user: "root".to_string(),
                private_key: PrivateKey::new("key"),
            },
            capacity: Resources::new(8, 32, 500),
            network: NodeNetwork {
                external_device: "ixgbe0".to_string(),
                internal_stub_device: "stub0".to_string(),
                default_router: "10.10.0.1".to_string(),
                private_zone_network: network.to_string(),
                zone_base_path: "/zones/".to_string(),
            },
            health: Some(NodeHealth::Online),
        }
    }

    fn zone(services: usize) -> Zone {
        let services = (0..services)
            .map(|i| Service {
                id: ServiceId::new(),
                name: format!("svc{i}"),
                description: "test".to_string(),
                command: "/bin/app".to_string(),
                arguments: None,
                user: "app".to_string(),
                working_dir: "/".to_string(),
                environment: None,
            })
            .collect();
        Zone::new(Resources::new(2, 4, 20), "https://img/base.tar.gz", services)
    }

    struct Harness {
        repo: Arc<InMemoryRepository>,
        nodes: Arc<MockNodeClient>,
        scheduler: ZoneScheduler,
    }

    fn harness() -> Harness {
        let repo = Arc::new(InMemoryRepository::new());
        let nodes = Arc::new(MockNodeClient::new());
        let scheduler = ZoneScheduler::new(
            repo.clone(),
            nodes.clone(),
            SchedulerConfig::default(),
        );
        Harness {
            repo,
            nodes,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_idle_when_nothing_pending() {
        let h = harness();
        assert_eq!(h.scheduler.run_tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_places_zone_and_builds_descriptor() {
        let h = harness();
        let node = node("10.10.0.0/24");
        let zone = zone(1);
        h.repo.insert_node(node.clone()).await;
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Placed {
                zone_id: zone.id,
                node_id: node.id,
                address: Ipv4Addr::new(10, 10, 0, 3),
            }
        );

        let stored = h.repo.zone(zone.id).await.unwrap();
        assert_eq!(stored.status, ZoneStatus::Stopped);
        assert_eq!(stored.node_id, Some(node.id));
        assert_eq!(stored.path.as_deref(), Some(format!("/zones/{}", zone.id).as_str()));
        assert_eq!(stored.ip_type.as_deref(), Some("exclusive"));
        assert_eq!(stored.brand.as_deref(), Some("lx"));
        let link = vnic_link_name(&zone.id.to_string());
        assert_eq!(stored.vnic.as_deref(), Some(link.as_str()));

        let zones = h.nodes.get_zones(&node).await.unwrap();
        let descriptor = &zones[0];
        assert_eq!(descriptor.capped_cpu, Some(CappedCpu { ncpus: 2 }));
        assert_eq!(descriptor.capped_memory.as_ref().unwrap().physical, "4G");
        assert_eq!(descriptor.net.len(), 1);
        assert_eq!(descriptor.net[0].physical, link);
        assert_eq!(descriptor.net[0].allowed_address.as_deref(), Some("10.10.0.3/24"));
        assert_eq!(descriptor.net[0].defrouter.as_deref(), Some("10.10.0.1"));
        assert_eq!(
            descriptor.resolvers,
            Some(vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_next_zone_gets_next_address() {
        let h = harness();
        let node = node("10.10.0.0/24");
        h.repo.insert_node(node).await;
        h.repo.insert_zone(zone(1)).await;
        h.scheduler.run_tick().await.unwrap();

        let second = zone(1);
        h.repo.insert_zone(second.clone()).await;
        h.scheduler.run_tick().await.unwrap();

        let stored = h.repo.zone(second.id).await.unwrap();
        assert_eq!(stored.internal_ip_address, Some(Ipv4Addr::new(10, 10, 0, 4)));
    }

    #[tokio::test]
    async fn test_no_eligible_node_reverts() {
        let h = harness();
        let zone = zone(1);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::RolledBack { zone_id, .. } if zone_id == zone.id));

        let stored = h.repo.zone(zone.id).await.unwrap();
        assert_eq!(stored.status, ZoneStatus::Unscheduled);
        assert!(h.nodes.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_network_reverts() {
        let h = harness();
        h.repo.insert_node(node("10.10.0.0/30")).await;
        let zone = zone(1);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        let TickOutcome::RolledBack { reason, .. } = outcome else {
            panic!("expected rollback, got {outcome:?}");
        };
        assert!(reason.contains("no free address"));
        assert_eq!(
            h.repo.zone(zone.id).await.unwrap().status,
            ZoneStatus::Unscheduled
        );
    }

    #[tokio::test]
    async fn test_vnic_failure_reverts_without_delete() {
        let h = harness();
        h.repo.insert_node(node("10.10.0.0/24")).await;
        h.nodes.fail(NodeOperation::CreateVnic).await;
        let zone = zone(1);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::RolledBack { .. }));
        assert!(h.nodes.calls_to(NodeOperation::DeleteVnic).await.is_empty());
        assert!(h.nodes.calls_to(NodeOperation::CreateZone).await.is_empty());
        assert_eq!(
            h.repo.zone(zone.id).await.unwrap().status,
            ZoneStatus::Unscheduled
        );
    }

    #[tokio::test]
    async fn test_zone_failure_deletes_vnic_and_reverts() {
        let h = harness();
        let node = node("10.10.0.0/24");
        h.repo.insert_node(node.clone()).await;
        h.nodes.fail(NodeOperation::CreateZone).await;
        let zone = zone(1);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::RolledBack { .. }));

        let link = vnic_link_name(&zone.id.to_string());
        assert_eq!(
            h.nodes.calls_to(NodeOperation::DeleteVnic).await,
            vec![NodeCall::DeleteVnic(node.id, link)]
        );
        assert!(h.nodes.vnics(node.id).await.is_empty());

        let stored = h.repo.zone(zone.id).await.unwrap();
        assert_eq!(stored.status, ZoneStatus::Unscheduled);
        assert!(stored.node_id.is_none());
        assert!(stored.internal_ip_address.is_none());
        assert!(stored.path.is_none());
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_original_error() {
        let h = harness();
        h.repo.insert_node(node("10.10.0.0/24")).await;
        h.nodes.fail(NodeOperation::CreateZone).await;
        h.nodes.fail(NodeOperation::DeleteVnic).await;
        let zone = zone(1);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        let TickOutcome::RolledBack { reason, .. } = outcome else {
            panic!("expected rollback, got {outcome:?}");
        };
        assert!(reason.contains("CreateZone"));
        assert_eq!(
            h.repo.zone(zone.id).await.unwrap().status,
            ZoneStatus::Unscheduled
        );
    }

    #[tokio::test]
    async fn test_service_count_is_enforced() {
        let h = harness();
        h.repo.insert_node(node("10.10.0.0/24")).await;
        let zone = zone(2);
        h.repo.insert_zone(zone.clone()).await;

        let outcome = h.scheduler.run_tick().await.unwrap();
        let TickOutcome::RolledBack { reason, .. } = outcome else {
            panic!("expected rollback, got {outcome:?}");
        };
        assert!(reason.contains("exactly one service"));
        assert_eq!(h.nodes.calls_to(NodeOperation::DeleteVnic).await.len(), 1);
    }
}

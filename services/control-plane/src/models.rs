//! Domain model shared by the scheduler, the reconciler and the repository.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zonefleet_id::{NodeId, ServiceId, ZoneId};

use crate::node::PrivateKey;

/// Lifecycle status of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    /// Waiting for a scheduler tick to place it.
    Unscheduled,
    /// Claimed by a scheduler tick; placement in progress.
    Scheduling,
    /// Provisioned on a node but not running.
    Stopped,
    /// Running on its node.
    Running,
}

impl ZoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Scheduling => "scheduling",
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }

    /// True once the zone exists on a node.
    pub fn is_provisioned(&self) -> bool {
        matches!(self, Self::Stopped | Self::Running)
    }
}

impl std::fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ZoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unscheduled" => Ok(Self::Unscheduled),
            "scheduling" => Ok(Self::Scheduling),
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            other => Err(format!("unknown zone status: {other}")),
        }
    }
}

/// Reachability of a node as last observed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Online,
    Offline,
}

impl NodeHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown node health: {other}")),
        }
    }
}

/// CPU, RAM and disk, either requested by a zone or offered by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_count: u32,
    pub ram_gb: u32,
    pub disk_gb: u32,
}

impl Resources {
    pub fn new(cpu_count: u32, ram_gb: u32, disk_gb: u32) -> Self {
        Self {
            cpu_count,
            ram_gb,
            disk_gb,
        }
    }
}

/// How to reach a node's remote shell.
#[derive(Debug, Clone)]
pub struct NodeConnection {
    /// Hostname or IP address.
    pub address: String,

    /// SSH port.
    pub port: u16,

    /// Login user.
    pub user: String,

    /// Private key; only the node client can read it.
    pub private_key: PrivateKey,
}

/// Per-node network layout used when provisioning zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNetwork {
    /// Physical NIC facing the outside world.
    pub external_device: String,

    /// Etherstub that zone VNICs are created over.
    pub internal_stub_device: String,

    /// Default router handed to every zone.
    pub default_router: String,

    /// Private CIDR block zone addresses are drawn from.
    pub private_zone_network: String,

    /// Parent directory of every zone path on this node.
    pub zone_base_path: String,
}

/// A physical host.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub connection: NodeConnection,
    pub capacity: Resources,
    pub network: NodeNetwork,
    /// `None` until the reconciler has checked the node once.
    pub health: Option<NodeHealth>,
}

/// The process a zone runs, installed as a systemd unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    /// Unit name, without the `.service` suffix.
    pub name: String,
    pub description: String,
    pub command: String,
    pub arguments: Option<String>,
    pub user: String,
    pub working_dir: String,
    /// Raw `Environment=` value, e.g. `PORT=8080 MODE=prod`.
    pub environment: Option<String>,
}

impl Service {
    /// Command line with arguments appended.
    pub fn command_line(&self) -> String {
        match self.arguments.as_deref() {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args),
            _ => self.command.clone(),
        }
    }
}

/// A zone: desired resources plus whatever placement has been recorded.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub resources: Resources,
    pub image_uri: String,
    pub services: Vec<Service>,
    pub status: ZoneStatus,
    pub node_id: Option<NodeId>,
    pub internal_ip_address: Option<Ipv4Addr>,
    pub path: Option<String>,
    pub vnic: Option<String>,
    pub ip_type: Option<String>,
    /// Requested brand before placement, provisioned brand after.
    pub brand: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Zone {
    /// A fresh, unplaced zone.
    pub fn new(resources: Resources, image_uri: impl Into<String>, services: Vec<Service>) -> Self {
        Self {
            id: ZoneId::new(),
            resources,
            image_uri: image_uri.into(),
            services,
            status: ZoneStatus::Unscheduled,
            node_id: None,
            internal_ip_address: None,
            path: None,
            vnic: None,
            ip_type: None,
            brand: None,
            updated_at: Utc::now(),
        }
    }
}

/// A node together with every zone currently assigned to it.
#[derive(Debug, Clone)]
pub struct NodeWithZones {
    pub node: Node,
    pub zones: Vec<Zone>,
}

impl NodeWithZones {
    /// Sum of the resources requested by the node's zones, saturating at
    /// `u32::MAX` per resource.
    pub fn used(&self) -> Resources {
        self.zones.iter().fold(Resources::default(), |acc, zone| Resources {
            cpu_count: acc.cpu_count.saturating_add(zone.resources.cpu_count),
            ram_gb: acc.ram_gb.saturating_add(zone.resources.ram_gb),
            disk_gb: acc.disk_gb.saturating_add(zone.resources.disk_gb),
        })
    }

    /// Private addresses already handed to the node's zones.
    pub fn used_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.zones.iter().filter_map(|zone| zone.internal_ip_address)
    }
}

/// Everything recorded when a zone is successfully provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub node_id: NodeId,
    pub address: Ipv4Addr,
    pub path: String,
    pub vnic: String,
    pub ip_type: String,
    pub brand: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_status_roundtrip() {
        for status in [
            ZoneStatus::Unscheduled,
            ZoneStatus::Scheduling,
            ZoneStatus::Stopped,
            ZoneStatus::Running,
        ] {
            assert_eq!(status.as_str().parse::<ZoneStatus>().unwrap(), status);
        }
        assert!("quiesced".parse::<ZoneStatus>().is_err());
    }

    #[test]
    fn test_command_line() {
        let mut service = Service {
            id: ServiceId::new(),
            name: "web".to_string(),
            description: "web".to_string(),
            command: "/usr/bin/app".to_string(),
            arguments: Some("--port 8080".to_string()),
            user: "app".to_string(),
            working_dir: "/srv".to_string(),
            environment: None,
        };
        assert_eq!(service.command_line(), "/usr/bin/app --port 8080");

        service.arguments = None;
        assert_eq!(service.command_line(), "/usr/bin/app");
    }

    #[test]
    fn test_used_saturates_instead_of_overflowing() {
        let node = Node {
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
                private_zone_network: "10.10.0.0/24".to_string(),
                zone_base_path: "/zones".to_string(),
            },
            health: None,
        };
        let zone = |resources| Zone::new(resources, "https://img", Vec::new());
        let fleet = NodeWithZones {
            node,
            zones: vec![
                zone(Resources::new(u32::MAX, 2, 10)),
                zone(Resources::new(1, 3, 10)),
            ],
        };

        assert_eq!(fleet.used(), Resources::new(u32::MAX, 5, 20));
    }
}

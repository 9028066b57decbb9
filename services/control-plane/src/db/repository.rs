//! SQL implementation of the repository.
//!
//! Conditional `UPDATE ... WHERE status = ...` statements carry the state
//! machine: a transition that matches no row means another writer moved the
//! zone first.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;
use zonefleet_id::{NodeId, ZoneId};

use crate::models::{
    Node, NodeConnection, NodeHealth, NodeNetwork, NodeWithZones, Placement, Resources, Service,
    Zone, ZoneStatus,
};
use crate::node::PrivateKey;
use crate::repository::{Repository, RepositoryError, RepositoryResult};

const NODE_COLUMNS: &str = "id, address, port, username, private_key, cpu_count, ram_gb, \
     disk_gb, external_device, internal_stub_device, default_router, private_zone_network, \
     zone_base_path, health";

const ZONE_COLUMNS: &str = "id, cpu_count, ram_gb, disk_gb, image_uri, status, node_id, \
     internal_ip_address, path, vnic, ip_type, brand, updated_at";

const SERVICE_COLUMNS: &str =
    "id, zone_id, name, description, command, arguments, username, working_dir, environment";

fn decode<T>(column: &'static str, value: &str) -> RepositoryResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| RepositoryError::Decode {
        column,
        message: e.to_string(),
    })
}

fn decode_count(column: &'static str, value: i32) -> RepositoryResult<u32> {
    u32::try_from(value).map_err(|e| RepositoryError::Decode {
        column,
        message: e.to_string(),
    })
}

fn encode_count(column: &'static str, value: u32) -> RepositoryResult<i32> {
    i32::try_from(value).map_err(|e| RepositoryError::Encode {
        column,
        message: e.to_string(),
    })
}

struct NodeRow {
    id: String,
    address: String,
    port: i32,
    username: String,
    private_key: String,
    cpu_count: i32,
    ram_gb: i32,
    disk_gb: i32,
    external_device: String,
    internal_stub_device: String,
    default_router: String,
    private_zone_network: String,
    zone_base_path: String,
    health: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for NodeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            port: row.try_get("port")?,
            username: row.try_get("username")?,
            private_key: row.try_get("private_key")?,
            cpu_count: row.try_get("cpu_count")?,
            ram_gb: row.try_get("ram_gb")?,
            disk_gb: row.try_get("disk_gb")?,
            external_device: row.try_get("external_device")?,
            internal_stub_device: row.try_get("internal_stub_device")?,
            default_router: row.try_get("default_router")?,
            private_zone_network: row.try_get("private_zone_network")?,
            zone_base_path: row.try_get("zone_base_path")?,
            health: row.try_get("health")?,
        })
    }
}

impl NodeRow {
    fn into_node(self) -> RepositoryResult<Node> {
        Ok(Node {
            id: decode("nodes.id", &self.id)?,
            connection: NodeConnection {
                address: self.address,
                port: u16::try_from(self.port).map_err(|e| RepositoryError::Decode {
                    column: "nodes.port",
                    message: e.to_string(),
                })?,
                user: self.username,
                private_key: PrivateKey::new(self.private_key),
            },
            capacity: Resources {
                cpu_count: decode_count("nodes.cpu_count", self.cpu_count)?,
                ram_gb: decode_count("nodes.ram_gb", self.ram_gb)?,
                disk_gb: decode_count("nodes.disk_gb", self.disk_gb)?,
            },
            network: NodeNetwork {
                external_device: self.external_device,
                internal_stub_device: self.internal_stub_device,
                default_router: self.default_router,
                private_zone_network: self.private_zone_network,
                zone_base_path: self.zone_base_path,
            },
            health: self
                .health
                .as_deref()
                .map(|h| decode("nodes.health", h))
                .transpose()?,
        })
    }
}

struct ZoneRow {
    id: String,
    cpu_count: i32,
    ram_gb: i32,
    disk_gb: i32,
    image_uri: String,
    status: String,
    node_id: Option<String>,
    internal_ip_address: Option<String>,
    path: Option<String>,
    vnic: Option<String>,
    ip_type: Option<String>,
    brand: Option<String>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ZoneRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            cpu_count: row.try_get("cpu_count")?,
            ram_gb: row.try_get("ram_gb")?,
            disk_gb: row.try_get("disk_gb")?,
            image_uri: row.try_get("image_uri")?,
            status: row.try_get("status")?,
            node_id: row.try_get("node_id")?,
            internal_ip_address: row.try_get("internal_ip_address")?,
            path: row.try_get("path")?,
            vnic: row.try_get("vnic")?,
            ip_type: row.try_get("ip_type")?,
            brand: row.try_get("brand")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ZoneRow {
    fn into_zone(self) -> RepositoryResult<Zone> {
        Ok(Zone {
            id: decode("zones.id", &self.id)?,
            resources: Resources {
                cpu_count: decode_count("zones.cpu_count", self.cpu_count)?,
                ram_gb: decode_count("zones.ram_gb", self.ram_gb)?,
                disk_gb: decode_count("zones.disk_gb", self.disk_gb)?,
            },
            image_uri: self.image_uri,
            services: Vec::new(),
            status: decode("zones.status", &self.status)?,
            node_id: self
                .node_id
                .as_deref()
                .map(|id| decode("zones.node_id", id))
                .transpose()?,
            internal_ip_address: self
                .internal_ip_address
                .as_deref()
                .map(|ip| decode("zones.internal_ip_address", ip))
                .transpose()?,
            path: self.path,
            vnic: self.vnic,
            ip_type: self.ip_type,
            brand: self.brand,
            updated_at: self.updated_at,
        })
    }
}

struct ServiceRow {
    zone_id: String,
    service: Service,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ServiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        Ok(Self {
            zone_id: row.try_get("zone_id")?,
            service: Service {
                id: id.parse().map_err(|e| sqlx::Error::ColumnDecode {
                    index: "id".to_string(),
                    source: Box::new(e),
                })?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                command: row.try_get("command")?,
                arguments: row.try_get("arguments")?,
                user: row.try_get("username")?,
                working_dir: row.try_get("working_dir")?,
                environment: row.try_get("environment")?,
            },
        })
    }
}

/// [`Repository`] backed by Postgres.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Decode zone rows and attach their services.
    async fn hydrate(&self, rows: Vec<ZoneRow>) -> RepositoryResult<Vec<Zone>> {
        let mut zones = rows
            .into_iter()
            .map(ZoneRow::into_zone)
            .collect::<RepositoryResult<Vec<_>>>()?;
        if zones.is_empty() {
            return Ok(zones);
        }

        let ids: Vec<String> = zones.iter().map(|zone| zone.id.to_string()).collect();
        let rows = sqlx::query_as::<_, ServiceRow>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE zone_id = ANY($1) ORDER BY created_at, id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_zone: HashMap<String, Vec<Service>> = HashMap::new();
        for row in rows {
            by_zone.entry(row.zone_id).or_default().push(row.service);
        }
        for zone in &mut zones {
            zone.services = by_zone.remove(&zone.id.to_string()).unwrap_or_default();
        }

        Ok(zones)
    }

    async fn hydrate_one(&self, row: ZoneRow) -> RepositoryResult<Zone> {
        let id = row.id.clone();
        self.hydrate(vec![row])
            .await?
            .pop()
            .ok_or_else(|| RepositoryError::NotFound { kind: "zone", id })
    }

    /// Explain why a conditional update on `id` matched no row.
    async fn transition_failed(&self, id: ZoneId, expected: ZoneStatus) -> RepositoryError {
        let status = sqlx::query("SELECT status FROM zones WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await;

        match status {
            Ok(Some(row)) => {
                let actual = row
                    .try_get::<String, _>("status")
                    .map_err(RepositoryError::from)
                    .and_then(|s| decode("zones.status", &s));
                match actual {
                    Ok(actual) => RepositoryError::ClaimConflict {
                        zone_id: id,
                        expected,
                        actual,
                    },
                    Err(e) => e,
                }
            }
            Ok(None) => RepositoryError::zone_not_found(id),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_oldest_pending_zone(&self) -> RepositoryResult<Option<Zone>> {
        let row = sqlx::query_as::<_, ZoneRow>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones \
             WHERE status = 'unscheduled' AND node_id IS NULL \
             ORDER BY updated_at, id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate_one(row).await?)),
            None => Ok(None),
        }
    }

    async fn claim_zone(&self, id: ZoneId) -> RepositoryResult<Zone> {
        let row = sqlx::query_as::<_, ZoneRow>(&format!(
            "UPDATE zones SET status = 'scheduling', updated_at = now() \
             WHERE id = $1 AND status = 'unscheduled' AND node_id IS NULL \
             RETURNING {ZONE_COLUMNS}"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!(zone_id = %id, "Zone claimed");
                self.hydrate_one(row).await
            }
            None => Err(self.transition_failed(id, ZoneStatus::Unscheduled).await),
        }
    }

    async fn commit_placement(&self, id: ZoneId, placement: &Placement) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE zones
            SET node_id = $2,
                internal_ip_address = $3,
                path = $4,
                vnic = $5,
                ip_type = $6,
                brand = $7,
                status = 'stopped',
                updated_at = now()
            WHERE id = $1 AND status = 'scheduling'
            "#,
        )
        .bind(id.to_string())
        .bind(placement.node_id.to_string())
        .bind(placement.address.to_string())
        .bind(&placement.path)
        .bind(&placement.vnic)
        .bind(&placement.ip_type)
        .bind(&placement.brand)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failed(id, ZoneStatus::Scheduling).await);
        }
        Ok(())
    }

    async fn revert_to_unscheduled(&self, id: ZoneId) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE zones
            SET node_id = NULL,
                internal_ip_address = NULL,
                path = NULL,
                vnic = NULL,
                ip_type = NULL,
                status = 'unscheduled',
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::zone_not_found(id));
        }
        Ok(())
    }

    async fn list_nodes_with_usage(&self) -> RepositoryResult<Vec<NodeWithZones>> {
        let nodes = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let zone_rows = sqlx::query_as::<_, ZoneRow>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones WHERE node_id IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_node: HashMap<NodeId, Vec<Zone>> = HashMap::new();
        for zone in self.hydrate(zone_rows).await? {
            if let Some(node_id) = zone.node_id {
                by_node.entry(node_id).or_default().push(zone);
            }
        }

        nodes
            .into_iter()
            .map(|row| {
                let node = row.into_node()?;
                let zones = by_node.remove(&node.id).unwrap_or_default();
                Ok(NodeWithZones { node, zones })
            })
            .collect()
    }

    async fn update_node_health(&self, id: NodeId, health: NodeHealth) -> RepositoryResult<()> {
        let result =
            sqlx::query("UPDATE nodes SET health = $2, updated_at = now() WHERE id = $1")
                .bind(id.to_string())
                .bind(health.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::node_not_found(id));
        }
        Ok(())
    }

    async fn find_zones_by_ids(&self, ids: &[ZoneId]) -> RepositoryResult<Vec<Zone>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query_as::<_, ZoneRow>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn update_zone_status(&self, id: ZoneId, status: ZoneStatus) -> RepositoryResult<()> {
        let result =
            sqlx::query("UPDATE zones SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id.to_string())
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::zone_not_found(id));
        }
        Ok(())
    }

    async fn find_zone(&self, id: ZoneId) -> RepositoryResult<Zone> {
        let row = sqlx::query_as::<_, ZoneRow>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::zone_not_found(id))?;

        self.hydrate_one(row).await
    }

    async fn find_node(&self, id: NodeId) -> RepositoryResult<Node> {
        sqlx::query_as::<_, NodeRow>(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::node_not_found(id))?
            .into_node()
    }
}

/// Insert helpers used to seed a database.
impl PgRepository {
    pub async fn insert_node(&self, node: &Node) -> RepositoryResult<()> {
        sqlx::query(&format!(
            "INSERT INTO nodes ({NODE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(node.id.to_string())
        .bind(&node.connection.address)
        .bind(i32::from(node.connection.port))
        .bind(&node.connection.user)
        .bind(node.connection.private_key.expose_secret())
        .bind(encode_count("nodes.cpu_count", node.capacity.cpu_count)?)
        .bind(encode_count("nodes.ram_gb", node.capacity.ram_gb)?)
        .bind(encode_count("nodes.disk_gb", node.capacity.disk_gb)?)
        .bind(&node.network.external_device)
        .bind(&node.network.internal_stub_device)
        .bind(&node.network.default_router)
        .bind(&node.network.private_zone_network)
        .bind(&node.network.zone_base_path)
        .bind(node.health.map(|h| h.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert an unscheduled zone with its services.
    pub async fn insert_zone(&self, zone: &Zone) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO zones (id, cpu_count, ram_gb, disk_gb, image_uri, status, brand)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(zone.id.to_string())
        .bind(encode_count("zones.cpu_count", zone.resources.cpu_count)?)
        .bind(encode_count("zones.ram_gb", zone.resources.ram_gb)?)
        .bind(encode_count("zones.disk_gb", zone.resources.disk_gb)?)
        .bind(&zone.image_uri)
        .bind(zone.status.as_str())
        .bind(&zone.brand)
        .execute(&mut *tx)
        .await?;

        for service in &zone.services {
            sqlx::query(&format!(
                "INSERT INTO services ({SERVICE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
            ))
            .bind(service.id.to_string())
            .bind(zone.id.to_string())
            .bind(&service.name)
            .bind(&service.description)
            .bind(&service.command)
            .bind(&service.arguments)
            .bind(&service.user)
            .bind(&service.working_dir)
            .bind(&service.environment)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_count_rejects_values_past_i32() {
        assert_eq!(encode_count("zones.ram_gb", 64).unwrap(), 64);
        assert_eq!(
            encode_count("zones.ram_gb", i32::MAX as u32).unwrap(),
            i32::MAX
        );

        let err = encode_count("zones.ram_gb", i32::MAX as u32 + 1).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Encode {
                column: "zones.ram_gb",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_reports_column() {
        let err = decode::<ZoneStatus>("zones.status", "quiesced").unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Decode {
                column: "zones.status",
                ..
            }
        ));
    }

    #[test]
    fn test_negative_count_is_rejected() {
        assert!(decode_count("nodes.cpu_count", -1).is_err());
        assert_eq!(decode_count("nodes.cpu_count", 8).unwrap(), 8);
    }

    #[test]
    fn test_zone_row_decodes_placement() {
        let node_id = NodeId::new();
        let row = ZoneRow {
            id: ZoneId::new().to_string(),
            cpu_count: 2,
            ram_gb: 4,
            disk_gb: 20,
            image_uri: "https://img".to_string(),
            status: "stopped".to_string(),
            node_id: Some(node_id.to_string()),
            internal_ip_address: Some("10.0.0.3".to_string()),
            path: Some("/zones/z".to_string()),
            vnic: Some("abcdef0".to_string()),
            ip_type: Some("exclusive".to_string()),
            brand: Some("lx".to_string()),
            updated_at: chrono::Utc::now(),
        };

        let zone = row.into_zone().unwrap();
        assert_eq!(zone.status, ZoneStatus::Stopped);
        assert_eq!(zone.node_id, Some(node_id));
        assert_eq!(
            zone.internal_ip_address,
            Some(std::net::Ipv4Addr::new(10, 0, 0, 3))
        );
        assert_eq!(zone.resources, Resources::new(2, 4, 20));
    }
}

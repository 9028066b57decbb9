//! Provisioning operations against a node.
//!
//! Every operation renders one script, opens one session, runs it and
//! closes the session. Zone creation carries its artifacts inside the
//! creation script.

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use zonefleet_id::ZoneId;

use super::error::{NodeError, NodeResult};
use super::models::{parse_zone_dump, parse_zone_listing, ListedZone, PhysicalZone, Vnic};
use super::shell::{RemoteShell, SshShell};
use super::templates::{
    BootZone, CreateVnic, CreateZone, DeleteVnic, GetZone, GetZones, ListZone, ListZones,
    ScriptTemplate, ServiceUnit, SetupZone, StagedArtifacts, StopZone,
};
use crate::models::{Node, Service};

/// Remote command that reads a script from stdin.
const RUN_SCRIPT: &str = "bash -s";

/// Remote command that does nothing; used to prove a session can be opened.
const NOOP: &str = "true";

/// The provisioning vocabulary a node understands.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Open and close a session. Any failure is `NodeUnreachable`.
    async fn ping(&self, node: &Node) -> NodeResult<()>;

    async fn list_zones(&self, node: &Node) -> NodeResult<Vec<ListedZone>>;

    /// Full descriptors of every zone on the node.
    async fn get_zones(&self, node: &Node) -> NodeResult<Vec<PhysicalZone>>;

    async fn get_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<PhysicalZone>;

    async fn list_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<ListedZone>;

    async fn create_vnic(&self, node: &Node, vnic: &Vnic) -> NodeResult<Vnic>;

    async fn delete_vnic(&self, node: &Node, link: &str) -> NodeResult<()>;

    /// Stage the descriptor, the service unit and the setup script, then
    /// create the zone, all in one session. Exactly one service is supported.
    async fn create_zone(
        &self,
        node: &Node,
        zone: &PhysicalZone,
        image_uri: &str,
        services: &[Service],
    ) -> NodeResult<PhysicalZone>;

    async fn boot_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()>;

    async fn stop_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()>;
}

/// [`NodeClient`] that drives nodes through a [`RemoteShell`].
#[derive(Debug, Clone, Default)]
pub struct SshNodeClient<S = SshShell> {
    shell: S,
}

impl<S: RemoteShell> SshNodeClient<S> {
    pub fn new(shell: S) -> Self {
        Self { shell }
    }

    /// Render a script and run it through `bash -s`, returning its stdout.
    async fn run<T: ScriptTemplate + Sync>(&self, node: &Node, script: &T) -> NodeResult<String> {
        let rendered = script.render()?;
        debug!(script = T::NAME, node_id = %node.id, "Running remote script");
        self.shell
            .exec(&node.connection, RUN_SCRIPT, Some(rendered.as_bytes()))
            .await?
            .into_stdout()
    }
}

#[async_trait]
impl<S: RemoteShell> NodeClient for SshNodeClient<S> {
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn ping(&self, node: &Node) -> NodeResult<()> {
        let reachable = match self.shell.exec(&node.connection, NOOP, None).await {
            Ok(output) if output.exit_code == 0 => Ok(()),
            Ok(output) => Err(output.stderr),
            Err(e) => Err(e.to_string()),
        };

        reachable.map_err(|message| NodeError::NodeUnreachable {
            address: node.connection.address.clone(),
            message,
        })
    }

    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn list_zones(&self, node: &Node) -> NodeResult<Vec<ListedZone>> {
        let stdout = self.run(node, &ListZones).await?;
        Ok(parse_zone_listing(&stdout)?)
    }

    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn get_zones(&self, node: &Node) -> NodeResult<Vec<PhysicalZone>> {
        let stdout = self.run(node, &GetZones).await?;
        Ok(parse_zone_dump(&stdout)?)
    }

    #[instrument(skip(self, node), fields(node_id = %node.id, zone_id = %zone_id))]
    async fn get_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<PhysicalZone> {
        let zone_name = zone_id.to_string();
        let stdout = self
            .run(
                node,
                &GetZone {
                    zone_name: &zone_name,
                },
            )
            .await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    #[instrument(skip(self, node), fields(node_id = %node.id, zone_id = %zone_id))]
    async fn list_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<ListedZone> {
        let zone_name = zone_id.to_string();
        let stdout = self
            .run(
                node,
                &ListZone {
                    zone_name: &zone_name,
                },
            )
            .await?;

        parse_zone_listing(&stdout)?
            .into_iter()
            .find(|zone| zone.id == zone_name)
            .ok_or(NodeError::ZoneNotFound(zone_name))
    }

    #[instrument(skip(self, node), fields(node_id = %node.id, link = %vnic.link))]
    async fn create_vnic(&self, node: &Node, vnic: &Vnic) -> NodeResult<Vnic> {
        self.run(
            node,
            &CreateVnic {
                link: &vnic.link,
                over: &vnic.over,
            },
        )
        .await?;
        info!(link = %vnic.link, over = %vnic.over, "VNIC created");
        Ok(vnic.clone())
    }

    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn delete_vnic(&self, node: &Node, link: &str) -> NodeResult<()> {
        self.run(node, &DeleteVnic { link }).await?;
        info!(link, "VNIC deleted");
        Ok(())
    }

    #[instrument(
        skip(self, node, zone, image_uri, services),
        fields(node_id = %node.id, zone_name = %zone.zonename)
    )]
    async fn create_zone(
        &self,
        node: &Node,
        zone: &PhysicalZone,
        image_uri: &str,
        services: &[Service],
    ) -> NodeResult<PhysicalZone> {
        let [service] = services else {
            return Err(NodeError::UnsupportedServiceCount(services.len()));
        };

        let command = service.command_line();
        let unit_file = ServiceUnit {
            description: &service.description,
            user: &service.user,
            working_dir: &service.working_dir,
            command: &command,
            environment: service.environment.as_deref().unwrap_or_default(),
        }
        .render()?;
        let artifacts = StagedArtifacts {
            config_json: serde_json::to_string_pretty(zone)?,
            unit_file,
            setup_script: SetupZone.render()?,
        };
        debug!(
            config_bytes = artifacts.config_json.len(),
            unit_bytes = artifacts.unit_file.len(),
            setup_bytes = artifacts.setup_script.len(),
            "Staging zone artifacts"
        );

        let params = CreateZone::new(
            &zone.brand,
            image_uri,
            &zone.zonename,
            &zone.zonepath,
            &service.name,
            artifacts,
        );
        self.run(node, &params).await?;

        info!(
            zone_name = %zone.zonename,
            zone_path = %zone.zonepath,
            unit = %service.name,
            "Zone created"
        );
        Ok(zone.clone())
    }

    #[instrument(skip(self, node), fields(node_id = %node.id, zone_id = %zone_id))]
    async fn boot_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()> {
        let zone_name = zone_id.to_string();
        self.run(
            node,
            &BootZone {
                zone_name: &zone_name,
            },
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, node), fields(node_id = %node.id, zone_id = %zone_id))]
    async fn stop_zone(&self, node: &Node, zone_id: &ZoneId) -> NodeResult<()> {
        let zone_name = zone_id.to_string();
        self.run(
            node,
            &StopZone {
                zone_name: &zone_name,
            },
        )
        .await?;
        Ok(())
    }
}

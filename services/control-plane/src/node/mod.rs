//! Remote node client.
//!
//! Talks to nodes over short-lived SSH sessions. Each provisioning primitive
//! is a script under `scripts/` rendered with typed parameters.

mod client;
mod error;
mod mock;
mod models;
mod shell;
pub mod templates;

pub use client::{NodeClient, SshNodeClient};
pub use error::{NodeError, NodeResult};
pub use mock::{MockNodeClient, NodeCall, NodeOperation};
pub use models::{
    CappedCpu, CappedMemory, ListedZone, PhysicalZone, Vnic, ZoneNet, IP_TYPE_EXCLUSIVE,
};
pub use shell::{CommandOutput, PrivateKey, RemoteShell, SshConfig, SshShell};

//! Scheduler loop.
//!
//! Each tick takes the oldest unscheduled zone, claims it, picks a node,
//! allocates an address, creates a VNIC and provisions the zone. Any failure
//! between the claim and provisioning undoes the completed remote steps and
//! returns the zone to `Unscheduled`.

mod provisioner;
mod saga;
mod worker;

pub use provisioner::{TickOutcome, ZoneScheduler};
pub use saga::{Compensation, Saga};
pub use worker::SchedulerWorker;

use zonefleet_id::NodeId;
use zonefleet_networking::NetworkError;

use crate::node::NodeError;
use crate::repository::RepositoryError;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur during scheduling.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no eligible node available")]
    NoEligibleNode,

    #[error("no free address left in {network} on node {node_id}")]
    AddressSpaceExhausted { node_id: NodeId, network: String },

    #[error("invalid zone network: {0}")]
    Address(#[from] NetworkError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Values written into every zone the scheduler provisions.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Brand used when a zone does not ask for one.
    pub default_brand: String,

    /// DNS resolvers handed to the zone.
    pub resolvers: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_brand: "lx".to_string(),
            resolvers: vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()],
        }
    }
}

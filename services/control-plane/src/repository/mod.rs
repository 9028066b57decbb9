//! Persistence boundary for nodes and zones.
//!
//! The scheduler and the reconciler only see the [`Repository`] trait. The
//! claim step is the one operation that must be atomic: two concurrent
//! callers may not both move the same zone out of `Unscheduled`.

mod memory;

pub use memory::InMemoryRepository;

use async_trait::async_trait;
use thiserror::Error;
use zonefleet_id::{NodeId, ZoneId};

use crate::models::{Node, NodeHealth, NodeWithZones, Placement, Zone, ZoneStatus};

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The zone was not in the state the operation requires; another writer
    /// got there first.
    #[error("zone {zone_id} is {actual}, expected {expected}")]
    ClaimConflict {
        zone_id: ZoneId,
        expected: ZoneStatus,
        actual: ZoneStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A domain value does not fit the column it is stored in.
    #[error("cannot store {column}: {message}")]
    Encode {
        column: &'static str,
        message: String,
    },

    /// A stored row could not be turned back into a domain value.
    #[error("failed to decode stored {column}: {message}")]
    Decode {
        column: &'static str,
        message: String,
    },
}

impl RepositoryError {
    pub fn zone_not_found(id: ZoneId) -> Self {
        Self::NotFound {
            kind: "zone",
            id: id.to_string(),
        }
    }

    pub fn node_not_found(id: NodeId) -> Self {
        Self::NotFound {
            kind: "node",
            id: id.to_string(),
        }
    }
}

/// Nodes and zones as the scheduling core needs them.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Oldest `Unscheduled` zone without a node, least recently updated
    /// first.
    async fn find_oldest_pending_zone(&self) -> RepositoryResult<Option<Zone>>;

    /// Atomically move a zone from `Unscheduled` to `Scheduling`.
    ///
    /// Fails with `ClaimConflict` if the zone is in any other state.
    async fn claim_zone(&self, id: ZoneId) -> RepositoryResult<Zone>;

    /// Record a successful placement and mark the zone `Stopped`.
    ///
    /// Only valid while the zone is `Scheduling`.
    async fn commit_placement(&self, id: ZoneId, placement: &Placement) -> RepositoryResult<()>;

    /// Clear any placement and return the zone to `Unscheduled`.
    async fn revert_to_unscheduled(&self, id: ZoneId) -> RepositoryResult<()>;

    /// Every node with its credentials and its currently assigned zones.
    async fn list_nodes_with_usage(&self) -> RepositoryResult<Vec<NodeWithZones>>;

    async fn update_node_health(&self, id: NodeId, health: NodeHealth) -> RepositoryResult<()>;

    /// Zones with the given ids; unknown ids are skipped.
    async fn find_zones_by_ids(&self, ids: &[ZoneId]) -> RepositoryResult<Vec<Zone>>;

    async fn update_zone_status(&self, id: ZoneId, status: ZoneStatus) -> RepositoryResult<()>;

    async fn find_zone(&self, id: ZoneId) -> RepositoryResult<Zone>;

    async fn find_node(&self, id: NodeId) -> RepositoryResult<Node>;
}

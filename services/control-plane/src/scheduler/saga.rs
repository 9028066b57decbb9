//! Compensating actions for a provisioning attempt.

use tracing::{info, warn};

use crate::models::Node;
use crate::node::NodeClient;

/// Undo for one completed remote step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteVnic { link: String },
}

/// Completed steps of a provisioning attempt on one node.
///
/// Steps register their undo once they succeed. [`Saga::compensate`] runs
/// the undos newest first. An undo that fails is logged and skipped; it never
/// replaces the error that caused the rollback.
pub struct Saga<'a> {
    client: &'a dyn NodeClient,
    node: &'a Node,
    completed: Vec<Compensation>,
}

impl<'a> Saga<'a> {
    pub fn new(client: &'a dyn NodeClient, node: &'a Node) -> Self {
        Self {
            client,
            node,
            completed: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.completed.push(compensation);
    }

    pub fn pending(&self) -> &[Compensation] {
        &self.completed
    }

    /// Run every registered undo in reverse order. Returns how many failed.
    pub async fn compensate(self) -> usize {
        let mut failed = 0;

        for compensation in self.completed.into_iter().rev() {
            let result = match &compensation {
                Compensation::DeleteVnic { link } => self.client.delete_vnic(self.node, link).await,
            };

            match result {
                Ok(()) => info!(
                    node_id = %self.node.id,
                    compensation = ?compensation,
                    "Compensation applied"
                ),
                Err(e) => {
                    failed += 1;
                    warn!(
                        node_id = %self.node.id,
                        compensation = ?compensation,
                        error = %e,
                        "Compensation failed"
                    );
                }
            }
        }

        failed
    }
}

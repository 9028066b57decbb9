//! Dependencies shared by the workers and the lifecycle operations.

use std::sync::Arc;

use crate::lifecycle::ZoneLifecycle;
use crate::node::NodeClient;
use crate::reconciler::NodeReconciler;
use crate::repository::Repository;
use crate::scheduler::{SchedulerConfig, ZoneScheduler};

/// Shared application state.
///
/// Holds the one repository and the one node client of the process. Every
/// component gets them from here.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    repository: Arc<dyn Repository>,
    nodes: Arc<dyn NodeClient>,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>, nodes: Arc<dyn NodeClient>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { repository, nodes }),
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.inner.repository
    }

    pub fn nodes(&self) -> &Arc<dyn NodeClient> {
        &self.inner.nodes
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> ZoneScheduler {
        ZoneScheduler::new(self.repository().clone(), self.nodes().clone(), config)
    }

    pub fn reconciler(&self) -> NodeReconciler {
        NodeReconciler::new(self.repository().clone(), self.nodes().clone())
    }

    pub fn lifecycle(&self) -> ZoneLifecycle {
        ZoneLifecycle::new(self.repository().clone(), self.nodes().clone())
    }
}

//! Shared operator context
//!
//! Built once in `main` and handed to every controller behind an `Arc`.
//! Catalog, configuration and OpenShift version never change after startup;
//! the cluster facts are refreshed by every ClusterPolicy reconcile.

use std::sync::Arc;

use cluster_client::ClusterClientTrait;
use tokio::sync::RwLock;

use crate::config::OperatorConfig;
use crate::manifests::Catalog;
use crate::metrics::OperatorMetrics;
use crate::node::runtime::Runtime;

/// Facts gathered by the last ClusterPolicy reconcile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub runtime: Runtime,
    pub has_gpu_nodes: bool,
    pub has_nfd_labels: bool,
}

pub struct OperatorContext {
    pub config: OperatorConfig,
    pub client: Arc<dyn ClusterClientTrait>,
    pub catalog: Catalog,
    /// `None` outside OpenShift
    pub openshift_version: Option<String>,
    pub metrics: Arc<OperatorMetrics>,
    cluster: RwLock<ClusterInfo>,
}

impl OperatorContext {
    pub fn new(
        config: OperatorConfig,
        client: Arc<dyn ClusterClientTrait>,
        catalog: Catalog,
        openshift_version: Option<String>,
        metrics: Arc<OperatorMetrics>,
    ) -> Self {
        Self {
            config,
            client,
            catalog,
            openshift_version,
            metrics,
            cluster: RwLock::new(ClusterInfo::default()),
        }
    }

    pub fn is_openshift(&self) -> bool {
        self.openshift_version.is_some()
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub async fn cluster_info(&self) -> ClusterInfo {
        *self.cluster.read().await
    }

    pub async fn set_cluster_info(&self, info: ClusterInfo) {
        *self.cluster.write().await = info;
    }
}

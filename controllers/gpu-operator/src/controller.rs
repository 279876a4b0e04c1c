//! Main controller implementation.
//!
//! Builds the shared context and runs the ClusterPolicy, NVIDIADriver and
//! driver upgrade watchers next to the metrics server. The process exits
//! as soon as any of them stops.

use std::sync::Arc;

use cluster_client::{ClusterClientTrait, KubeClusterClient};
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::manifests::Catalog;
use crate::metrics::{self, OperatorMetrics};
use crate::upgrade::NodeUpgradeStateManager;
use crate::watcher::Watcher;

/// Main controller for the GPU operator.
pub struct Controller {
    cluster_policy_watcher: JoinHandle<Result<(), ControllerError>>,
    nvidia_driver_watcher: JoinHandle<Result<(), ControllerError>>,
    upgrade_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to the cluster, loads the manifests and spawns every watcher.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing GPU operator");

        let kube_client = Client::try_default().await?;
        let cluster = Arc::new(KubeClusterClient::new(kube_client.clone()));

        let openshift_version = cluster.openshift_version().await?;
        match &openshift_version {
            Some(version) => info!("Running on OpenShift {}", version),
            None => info!("Running on Kubernetes"),
        }

        let catalog = Catalog::load(&config.assets_dir, openshift_version.is_some())?;
        info!("Loaded {} operand states from {}", catalog.states.len(), config.assets_dir.display());

        let metrics = Arc::new(OperatorMetrics::new()?);
        let metrics_addr = config.metrics_bind_address;
        let ctx = Arc::new(OperatorContext::new(
            config,
            cluster.clone(),
            catalog,
            openshift_version,
            metrics.clone(),
        ));
        let upgrade_manager = Arc::new(NodeUpgradeStateManager::new(cluster));

        let watcher_instance = Arc::new(Watcher::new(ctx, upgrade_manager, kube_client));

        let cluster_policy_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_cluster_policies().await })
        };

        let nvidia_driver_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_nvidia_drivers().await })
        };

        let upgrade_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_driver_upgrades().await })
        };

        let metrics_server = tokio::spawn(async move { metrics::serve(metrics_addr, metrics).await });

        Ok(Self {
            cluster_policy_watcher,
            nvidia_driver_watcher,
            upgrade_watcher,
            metrics_server,
        })
    }

    /// Runs until a watcher or the metrics server stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("GPU operator running");

        let (name, result) = tokio::select! {
            r = self.cluster_policy_watcher => ("ClusterPolicy watcher", r),
            r = self.nvidia_driver_watcher => ("NVIDIADriver watcher", r),
            r = self.upgrade_watcher => ("driver upgrade watcher", r),
            r = self.metrics_server => ("metrics server", r),
        };

        match result {
            Ok(Ok(())) => {
                error!("{} stopped", name);
                Err(ControllerError::Watch(format!("{} stopped", name)))
            }
            Ok(Err(e)) => {
                error!("{} failed: {}", name, e);
                Err(e)
            }
            Err(e) => {
                error!("{} panicked: {}", name, e);
                Err(ControllerError::Watch(format!("{} task failed: {}", name, e)))
            }
        }
    }
}

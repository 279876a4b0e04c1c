//! Kubernetes resource watchers.
//!
//! Every controller goes through `watch_resource()`, which wraps a
//! `kube_runtime::Controller` and keeps the reconcile loop running across
//! watch reconnects. Node events fan out to every watched object so that
//! GPU nodes joining or changing labels are picked up without a spec edit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crds::{ClusterPolicy, NVIDIADriver};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use tracing::{debug, error, info};

use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::labels::managed;
use crate::reconciler::cluster_policy::reconcile_cluster_policy;
use crate::reconciler::error_requeue;
use crate::reconciler::nvidia_driver::reconcile_nvidia_driver;
use crate::reconciler::upgrade::reconcile_upgrade;
use crate::upgrade::UpgradeStateManager;

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Drives `controller` until its watch stream ends.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    ctx: Arc<OperatorContext>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<OperatorContext>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, _ctx: Arc<OperatorContext>| {
        let delay = error_requeue(error);
        error!(
            "Reconciliation error for {} {}: {} (retry in {}s)",
            resource_name,
            obj.meta().name.as_deref().unwrap_or_default(),
            error,
            delay.as_secs()
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<OperatorContext>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.meta().name.as_deref().unwrap_or_default());
            reconcile_fn(ctx, obj).await
        }
    };

    // One reconcile at a time per kind: reconciles share node labels.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(1);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller event for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

fn managed_daemonsets() -> watcher::Config {
    watcher::Config::default().labels(&format!("{}={}", managed::MANAGED_BY, managed::MANAGED_BY_VALUE))
}

/// Watches the operator's custom resources.
pub struct Watcher {
    ctx: Arc<OperatorContext>,
    upgrade_manager: Arc<dyn UpgradeStateManager>,
    cluster_policy_api: Api<ClusterPolicy>,
    nvidia_driver_api: Api<NVIDIADriver>,
    daemonset_api: Api<DaemonSet>,
    node_api: Api<Node>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        ctx: Arc<OperatorContext>,
        upgrade_manager: Arc<dyn UpgradeStateManager>,
        client: kube::Client,
    ) -> Self {
        let daemonset_api = Api::namespaced(client.clone(), ctx.namespace());
        Self {
            ctx,
            upgrade_manager,
            cluster_policy_api: Api::all(client.clone()),
            nvidia_driver_api: Api::all(client.clone()),
            daemonset_api,
            node_api: Api::all(client),
        }
    }

    /// Reconciles ClusterPolicy on spec, owned DaemonSet and node changes.
    pub async fn watch_cluster_policies(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.cluster_policy_api.clone(), watcher::Config::default())
            .owns(self.daemonset_api.clone(), managed_daemonsets());
        let store = controller.store();
        let controller = controller.watches(self.node_api.clone(), watcher::Config::default(), move |_node: Node| {
            store.state().into_iter().map(|cp| ObjectRef::from_obj(&*cp)).collect::<Vec<_>>()
        });

        watch_resource(
            controller,
            self.ctx.clone(),
            |ctx, policy| Box::pin(async move { reconcile_cluster_policy(&ctx, &policy).await }),
            "ClusterPolicy",
        )
        .await
    }

    /// Reconciles NVIDIADriver instances; node changes move pool membership.
    pub async fn watch_nvidia_drivers(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.nvidia_driver_api.clone(), watcher::Config::default())
            .owns(self.daemonset_api.clone(), managed_daemonsets());
        let store = controller.store();
        let controller = controller.watches(self.node_api.clone(), watcher::Config::default(), move |_node: Node| {
            store.state().into_iter().map(|nd| ObjectRef::from_obj(&*nd)).collect::<Vec<_>>()
        });

        watch_resource(
            controller,
            self.ctx.clone(),
            |ctx, driver| Box::pin(async move { reconcile_nvidia_driver(&ctx, &driver).await }),
            "NVIDIADriver",
        )
        .await
    }

    /// Periodic driver upgrade passes against the active ClusterPolicy.
    pub async fn watch_driver_upgrades(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.cluster_policy_api.clone(), watcher::Config::default());
        let manager = self.upgrade_manager.clone();

        watch_resource(
            controller,
            self.ctx.clone(),
            move |ctx, policy| {
                let manager = manager.clone();
                Box::pin(async move { reconcile_upgrade(&ctx, manager.as_ref(), &policy).await })
            },
            "DriverUpgrade",
        )
        .await
    }
}

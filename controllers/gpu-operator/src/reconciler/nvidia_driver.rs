//! NVIDIADriver reconciliation
//!
//! Each instance owns a pool of GPU nodes. Ownership is recorded in the
//! `nvidia.com/gpu.driver.managed-by` node label and moved with
//! resourceVersion-conditional updates, so two instances racing for a node
//! cannot both win. The instance's driver DaemonSet only schedules onto nodes
//! carrying its own name in that label.

use std::collections::BTreeMap;

use cluster_client::Propagation;
use crds::{
    ClusterPolicy, DriverType, NVIDIADriver, State, ValidationError, outcome_conditions, resolve_driver_owners,
};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::labels::{DRIVER_MANAGED_BY, TRUE, deploy_label, managed};
use crate::manifests::{Kind, StateName};
use crate::node::classifier::has_gpu_labels;
use crate::node::runtime::{Runtime, cluster_runtime_strict};
use crate::reconciler::{REQUEUE_INVALID, REQUEUE_NOT_READY, active_policy, reasons};
use crate::state::controls::{ControlContext, daemonset_ready, prepare_object};
use crate::transforms::common::{apply_daemonsets_config, apply_pod_metadata, fill_placeholder_images, has_placeholder_images, pod_spec_mut};
use crate::transforms::driver::{set_config_digest, transform_driver};
use crate::transforms::{TransformContext, validator::validator_image};

/// Component label value carried by every NVIDIADriver DaemonSet and pod
pub const DRIVER_COMPONENT: &str = "nvidia-driver";

/// Name of the DaemonSet rendered for an instance.
pub fn daemonset_name(driver: &NVIDIADriver) -> String {
    let flavour = match driver.spec.driver_type {
        DriverType::Gpu => "gpu",
        DriverType::Vgpu => "vgpu",
        DriverType::VgpuHostManager => "vgpu-manager",
    };
    format!("nvidia-{}-driver-{}", flavour, driver.name_any())
}

async fn write_status(
    ctx: &OperatorContext,
    driver: &NVIDIADriver,
    state: State,
    reason: &str,
    message: &str,
) -> Result<(), ControllerError> {
    let mut status = driver.status.clone().unwrap_or_default();
    status.state = state;
    status.namespace = Some(ctx.namespace().to_string());
    outcome_conditions(&mut status.conditions, state == State::Ready, reason, message);
    ctx.client
        .patch_nvidia_driver_status(&driver.name_any(), &status)
        .await?;
    Ok(())
}

async fn fail(ctx: &OperatorContext, driver: &NVIDIADriver, reason: &str, err: ControllerError) -> ControllerError {
    if let Err(status_err) = write_status(ctx, driver, State::NotReady, reason, &err.to_string()).await {
        warn!(driver = %driver.name_any(), error = %status_err, "Failed to update NVIDIADriver status");
    }
    err
}

/// Moves the managed-by label so it matches the resolved owners.
///
/// An instance claims the nodes it owns (taking them over from a previous
/// owner) and releases nodes that no instance owns any more, including nodes
/// that lost their GPU. Every write is conditional on the resourceVersion the
/// label was read at.
async fn sync_node_claims(
    ctx: &OperatorContext,
    instance: &str,
    nodes: &[Node],
    owners: &BTreeMap<String, String>,
) -> Result<usize, ControllerError> {
    let mut changed = 0;
    for node in nodes {
        let node_name = node.name_any();
        let current = node.labels().get(DRIVER_MANAGED_BY).map(String::as_str);
        let desired = owners.get(&node_name).map(String::as_str);

        let update = match (current, desired) {
            (c, Some(d)) if d == instance && c != Some(instance) => Some(Some(instance)),
            (Some(c), None) if c == instance => Some(None),
            _ => None,
        };
        let Some(value) = update else {
            continue;
        };

        let mut updated = node.clone();
        match value {
            Some(v) => {
                updated.labels_mut().insert(DRIVER_MANAGED_BY.to_string(), v.to_string());
            }
            None => {
                updated.labels_mut().remove(DRIVER_MANAGED_BY);
            }
        }
        ctx.client.update_node(&updated).await?;
        info!(node = %node_name, from = ?current, to = ?value, "Driver ownership changed");
        changed += 1;
    }
    Ok(changed)
}

/// Renders the instance's driver DaemonSet from the catalog template.
pub fn render_driver_daemonset(
    ctx: &OperatorContext,
    policy: &ClusterPolicy,
    driver: &NVIDIADriver,
    runtime: Runtime,
) -> Result<DaemonSet, ControllerError> {
    let template_state = match driver.spec.driver_type {
        DriverType::VgpuHostManager => StateName::VgpuManager,
        DriverType::Gpu | DriverType::Vgpu => StateName::Driver,
    };
    let mut ds = ctx
        .catalog
        .state(template_state)
        .and_then(|s| s.resources.daemon_set.clone())
        .ok_or_else(|| ControllerError::asset(template_state.dir(), "no DaemonSet template"))?;

    let instance = driver.name_any();
    let name = daemonset_name(driver);
    let spec = &driver.spec;

    apply_daemonsets_config(&mut ds, &policy.spec.daemonsets)?;
    transform_driver(&mut ds, &spec.settings, &policy.spec.host_paths, &ctx.config)?;
    apply_pod_metadata(
        &mut ds,
        &spec.labels,
        &spec.annotations,
        &spec.tolerations,
        spec.priority_class_name.as_deref(),
    )?;

    let identity = BTreeMap::from([
        ("app".to_string(), name.clone()),
        (managed::COMPONENT.to_string(), DRIVER_COMPONENT.to_string()),
        (managed::DRIVER_INSTANCE.to_string(), instance.clone()),
    ]);
    ds.metadata.name = Some(name.clone());
    ds.metadata.labels.get_or_insert_with(Default::default).extend(identity.clone());
    let ds_spec = ds
        .spec
        .as_mut()
        .ok_or_else(|| ControllerError::transform(&name, "DaemonSet has no spec"))?;
    ds_spec.selector.match_labels = Some(BTreeMap::from([("app".to_string(), name.clone())]));
    ds_spec
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(Default::default)
        .extend(identity);

    let pod = pod_spec_mut(&mut ds)?;
    pod.node_selector = Some(BTreeMap::from([
        (deploy_label("driver"), TRUE.to_string()),
        (DRIVER_MANAGED_BY.to_string(), instance),
    ]));
    if has_placeholder_images(pod) {
        let transform_ctx = TransformContext {
            config: &ctx.config,
            runtime,
            openshift: ctx.is_openshift(),
        };
        fill_placeholder_images(pod, &validator_image(&policy.spec, &transform_ctx)?);
    }

    set_config_digest(&mut ds)?;
    Ok(ds)
}

/// Deletes DaemonSets left behind by an earlier rendering of the instance.
async fn remove_stale_daemonsets(ctx: &OperatorContext, instance: &str, keep: &str) -> Result<(), ControllerError> {
    let selector = format!("{}={}", managed::DRIVER_INSTANCE, instance);
    for ds in ctx.client.list_daemonsets(ctx.namespace(), Some(&selector)).await? {
        let ds_name = ds.name_any();
        if ds_name != keep {
            info!(driver = %instance, daemonset = %ds_name, "Deleting stale driver DaemonSet");
            ctx.client
                .delete_daemonset(ctx.namespace(), &ds_name, Propagation::Background)
                .await?;
        }
    }
    Ok(())
}

/// Reconciles one NVIDIADriver instance.
pub async fn reconcile_nvidia_driver(ctx: &OperatorContext, driver: &NVIDIADriver) -> Result<Action, ControllerError> {
    let name = driver.name_any();

    let Some(policy) = active_policy(ctx.client.list_cluster_policies().await?) else {
        write_status(ctx, driver, State::NotReady, reasons::RECONCILE_FAILED, "No ClusterPolicy found").await?;
        info!(driver = %name, "Waiting for a ClusterPolicy");
        return Ok(Action::requeue(REQUEUE_NOT_READY));
    };
    if !policy.spec.driver.use_nvidia_driver_crd() {
        write_status(
            ctx,
            driver,
            State::Disabled,
            reasons::NVIDIA_DRIVER_CRD_DISABLED,
            "ClusterPolicy driver.useNvidiaDriverCRD is not enabled",
        )
        .await?;
        debug!(driver = %name, "NVIDIADriver CRD disabled in ClusterPolicy");
        return Ok(Action::requeue(REQUEUE_INVALID));
    }

    if let Err(e) = driver.spec.settings.validate() {
        warn!(driver = %name, error = %e, "NVIDIADriver failed validation");
        return Err(fail(ctx, driver, reasons::VALIDATION_FAILED, e.into()).await);
    }

    let drivers = ctx.client.list_nvidia_drivers().await?;
    let nodes = ctx.client.list_nodes(None).await?;
    let gpu_nodes: Vec<Node> = nodes.iter().filter(|n| has_gpu_labels(n.labels())).cloned().collect();

    let owners = match resolve_driver_owners(&drivers, &gpu_nodes) {
        Ok(owners) => owners,
        Err(e) => {
            let reason = match &e {
                ValidationError::ConflictingNodeSelector { .. } => reasons::CONFLICTING_NODE_SELECTOR,
                _ => reasons::VALIDATION_FAILED,
            };
            warn!(driver = %name, error = %e, "Node selectors overlap");
            return Err(fail(ctx, driver, reason, e.into()).await);
        }
    };
    sync_node_claims(ctx, &name, &nodes, &owners).await?;

    let pool: Vec<Node> = gpu_nodes
        .into_iter()
        .filter(|n| owners.get(&n.name_any()) == Some(&name))
        .collect();
    let runtime = match cluster_runtime_strict(&pool, ctx.is_openshift()) {
        Ok(runtime) => runtime,
        Err(e) => return Err(fail(ctx, driver, reasons::RECONCILE_FAILED, e).await),
    };

    let ds = match render_driver_daemonset(ctx, &policy, driver, runtime) {
        Ok(ds) => ds,
        Err(e) => return Err(fail(ctx, driver, reasons::RECONCILE_FAILED, e).await),
    };
    let ds_name = ds.name_any();
    let mut object = serde_json::to_value(&ds)?;
    let control_ctx = ControlContext {
        client: ctx.client.as_ref(),
        namespace: ctx.namespace(),
        owner: driver.controller_owner_ref(&()),
    };
    prepare_object(Kind::DaemonSet, &mut object, &control_ctx)?;
    ctx.client.apply_object(&object).await?;
    remove_stale_daemonsets(ctx, &name, &ds_name).await?;

    let ready = ctx
        .client
        .get_daemonset(ctx.namespace(), &ds_name)
        .await?
        .is_some_and(|ds| daemonset_ready(&ds));
    if !ready {
        write_status(ctx, driver, State::NotReady, reasons::DRIVER_NOT_READY, "Driver pods are not ready").await?;
        info!(driver = %name, nodes = pool.len(), "Driver DaemonSet not ready");
        return Ok(Action::requeue(REQUEUE_NOT_READY));
    }

    write_status(ctx, driver, State::Ready, reasons::RECONCILED, "Driver is ready on every node in the pool").await?;
    info!(driver = %name, nodes = pool.len(), runtime = %runtime, "NVIDIADriver ready");
    Ok(Action::await_change())
}

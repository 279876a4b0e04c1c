//! ClusterPolicy reconciliation
//!
//! One pass: pick the active policy, validate it, label GPU nodes, detect the
//! container runtime, run every state and write the outcome back to status.

use crds::{ClusterPolicy, ClusterPolicySpec, State, outcome_conditions};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::context::{ClusterInfo, OperatorContext};
use crate::error::ControllerError;
use crate::metrics::status;
use crate::node::classifier::{default_workload, has_gpu_labels};
use crate::node::label_state::{LabelContext, reconcile_node_labels};
use crate::node::runtime::{Runtime, cluster_runtime, node_runtime};
use crate::reconciler::{REQUEUE_NO_NFD, REQUEUE_NOT_READY, active_policy, reasons};
use crate::state::StateEngine;

/// Cluster runtime from the GPU nodes, falling back to `operator.defaultRuntime`.
pub fn detect_runtime(nodes: &[Node], spec: &ClusterPolicySpec, openshift: bool) -> Runtime {
    let gpu_nodes: Vec<Node> = nodes
        .iter()
        .filter(|n| has_gpu_labels(n.labels()))
        .cloned()
        .collect();
    let detectable = gpu_nodes.iter().any(|n| node_runtime(n).is_ok());
    if !openshift && !detectable {
        if let Some(runtime) = spec.operator.default_runtime.as_deref().and_then(Runtime::from_name) {
            return runtime;
        }
    }
    cluster_runtime(&gpu_nodes, openshift)
}

async fn write_status(
    ctx: &OperatorContext,
    policy: &ClusterPolicy,
    state: State,
    reason: &str,
    message: &str,
) -> Result<(), ControllerError> {
    let mut status = policy.status.clone().unwrap_or_default();
    status.state = state;
    status.namespace = Some(ctx.namespace().to_string());
    outcome_conditions(&mut status.conditions, state == State::Ready, reason, message);
    ctx.client
        .patch_cluster_policy_status(&policy.name_any(), &status)
        .await?;
    Ok(())
}

/// Records a failed pass in status and metrics, then hands the error back.
async fn fail(ctx: &OperatorContext, policy: &ClusterPolicy, reason: &str, err: ControllerError) -> ControllerError {
    ctx.metrics.record_failure();
    if let Err(status_err) = write_status(ctx, policy, State::NotReady, reason, &err.to_string()).await {
        warn!(policy = %policy.name_any(), error = %status_err, "Failed to update ClusterPolicy status");
    }
    err
}

/// Reconciles one ClusterPolicy.
pub async fn reconcile_cluster_policy(ctx: &OperatorContext, policy: &ClusterPolicy) -> Result<Action, ControllerError> {
    let name = policy.name_any();
    ctx.metrics.reconciliation_total.inc();

    let active = active_policy(ctx.client.list_cluster_policies().await?);
    if active.as_ref().map(ResourceExt::name_any).as_deref() != Some(name.as_str()) {
        info!(policy = %name, "Another ClusterPolicy is already active, ignoring");
        let mut status = policy.status.clone().unwrap_or_default();
        if status.state != State::Ignored {
            status.state = State::Ignored;
            ctx.client.patch_cluster_policy_status(&name, &status).await?;
        }
        return Ok(Action::await_change());
    }
    let spec = &policy.spec;
    let openshift = ctx.is_openshift();

    if let Err(e) = spec.validate() {
        warn!(policy = %name, error = %e, "ClusterPolicy failed validation");
        return Err(fail(ctx, policy, reasons::VALIDATION_FAILED, e.into()).await);
    }

    let nodes = match ctx.client.list_nodes(None).await {
        Ok(nodes) => nodes,
        Err(e) => return Err(fail(ctx, policy, reasons::RECONCILE_FAILED, e.into()).await),
    };
    let runtime = detect_runtime(&nodes, spec, openshift);

    let label_ctx = LabelContext {
        openshift,
        sandbox_enabled: spec.sandbox_workloads.is_enabled(),
        default_workload: default_workload(spec.sandbox_workloads.default_workload.as_deref()),
    };
    let labels = match reconcile_node_labels(ctx.client.as_ref(), &nodes, &label_ctx).await {
        Ok(summary) => summary,
        Err(e) => return Err(fail(ctx, policy, reasons::RECONCILE_FAILED, e).await),
    };
    debug!(policy = %name, gpu_nodes = labels.gpu_nodes, updated = labels.updated, "Node labels reconciled");

    ctx.set_cluster_info(ClusterInfo {
        runtime,
        has_gpu_nodes: labels.gpu_nodes > 0,
        has_nfd_labels: labels.has_nfd_labels,
    })
    .await;
    let metrics = &ctx.metrics;
    metrics.gpu_nodes_total.set(i64::try_from(labels.gpu_nodes).unwrap_or(i64::MAX));
    metrics.reconciliation_has_nfd_labels.set(i64::from(labels.has_nfd_labels));
    metrics
        .openshift_driver_toolkit_enabled
        .set(i64::from(openshift && spec.operator.use_openshift_driver_toolkit.unwrap_or(false)));
    metrics
        .driver_auto_upgrade_enabled
        .set(i64::from(spec.driver.auto_upgrade_enabled()));

    let overall = match StateEngine::new(ctx, policy, runtime).run().await {
        Ok(overall) => overall,
        Err(e) => {
            error!(policy = %name, error = %e, "State engine failed");
            return Err(fail(ctx, policy, reasons::RECONCILE_FAILED, e).await);
        }
    };

    if !overall.is_ready() {
        metrics.reconciliation_status.set(status::NOT_READY);
        write_status(ctx, policy, State::NotReady, reasons::OPERAND_NOT_READY, "Operands are not ready").await?;
        info!(policy = %name, "ClusterPolicy not ready, requeueing");
        return Ok(Action::requeue(REQUEUE_NOT_READY));
    }

    if !labels.has_nfd_labels {
        metrics.reconciliation_status.set(status::NOT_READY);
        write_status(
            ctx,
            policy,
            State::NotReady,
            reasons::OPERAND_NOT_READY,
            "No node feature discovery labels found on any node",
        )
        .await?;
        warn!(policy = %name, "No NFD labels found, is node feature discovery running?");
        return Ok(Action::requeue(REQUEUE_NO_NFD));
    }

    metrics.record_success();
    write_status(ctx, policy, State::Ready, reasons::RECONCILED, "All operands are ready").await?;
    info!(policy = %name, runtime = %runtime, "ClusterPolicy ready");
    Ok(Action::await_change())
}

//! GPU-state label reconciliation
//!
//! Converges the `nvidia.com/gpu.*` labels that steer operand DaemonSets onto
//! nodes. Each node gets at most one resourceVersion-conditional update per
//! pass, and only when something changed.

use std::collections::BTreeMap;

use cluster_client::ClusterClientTrait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::labels;
use crate::node::classifier::{
    all_deploy_labels, has_gpu_labels, has_nfd_labels, is_mig_capable, workload_config, WorkloadConfig,
};
use crate::node::runtime::{node_runtime, Runtime};

/// Label edits: `Some` sets a value, `None` removes the key
pub type LabelChanges = BTreeMap<String, Option<String>>;

/// Cluster facts the labeling pass depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelContext {
    pub openshift: bool,
    pub sandbox_enabled: bool,
    pub default_workload: WorkloadConfig,
}

/// Outcome of a labeling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelSummary {
    /// Nodes with an NVIDIA PCI device
    pub gpu_nodes: usize,
    /// Any node carries NFD labels
    pub has_nfd_labels: bool,
    /// Nodes written
    pub updated: usize,
}

fn remove_if_present(labels: &BTreeMap<String, String>, key: &str, changes: &mut LabelChanges) {
    if labels.contains_key(key) {
        changes.insert(key.to_string(), None);
    }
}

fn add_if_missing(labels: &BTreeMap<String, String>, key: &str, changes: &mut LabelChanges) {
    if !labels.contains_key(key) {
        changes.insert(key.to_string(), Some(labels::TRUE.to_string()));
    }
}

fn set_if_different(labels: &BTreeMap<String, String>, key: &str, value: &str, changes: &mut LabelChanges) {
    if labels.get(key).map(String::as_str) != Some(value) {
        changes.insert(key.to_string(), Some(value.to_string()));
    }
}

fn remove_gpu_state_labels(labels: &BTreeMap<String, String>, changes: &mut LabelChanges) {
    for key in all_deploy_labels() {
        remove_if_present(labels, &key, changes);
    }
    remove_if_present(labels, labels::DEPLOY_MIG_MANAGER, changes);
}

fn runtime_label_changes(node: &Node, ctx: &LabelContext, changes: &mut LabelChanges) {
    let current = node.labels();
    let desired = if ctx.openshift {
        Some(Runtime::Crio)
    } else {
        node_runtime(node).ok()
    };
    for runtime in Runtime::ALL {
        let key = runtime.label();
        if Some(runtime) == desired {
            set_if_different(current, &key, labels::TRUE, changes);
        } else {
            remove_if_present(current, &key, changes);
        }
    }
}

/// Computes the minimal label edits converging one node.
pub fn desired_label_changes(node: &Node, ctx: &LabelContext) -> LabelChanges {
    let current = node.labels();
    let mut changes = LabelChanges::new();

    if !has_gpu_labels(current) {
        if current.get(labels::GPU_PRESENT).map(String::as_str) == Some(labels::TRUE) {
            changes.insert(labels::GPU_PRESENT.to_string(), Some(labels::FALSE.to_string()));
        }
        remove_gpu_state_labels(current, &mut changes);
        for runtime in Runtime::ALL {
            remove_if_present(current, &runtime.label(), &mut changes);
        }
        return changes;
    }

    set_if_different(current, labels::GPU_PRESENT, labels::TRUE, &mut changes);

    if current.get(labels::DEPLOY_OPERANDS).map(String::as_str) == Some(labels::FALSE) {
        remove_gpu_state_labels(current, &mut changes);
    } else {
        let node_name = node.name_any();
        let workload = workload_config(&node_name, current, ctx.sandbox_enabled, ctx.default_workload);
        let wanted = workload.deploy_labels();

        for key in all_deploy_labels() {
            if !wanted.contains(&key) {
                remove_if_present(current, &key, &mut changes);
            }
        }
        if workload != WorkloadConfig::Container {
            remove_if_present(current, labels::DEPLOY_MIG_MANAGER, &mut changes);
        }

        for key in &wanted {
            add_if_missing(current, key, &mut changes);
        }
        if workload == WorkloadConfig::Container && is_mig_capable(current) {
            add_if_missing(current, labels::DEPLOY_MIG_MANAGER, &mut changes);
        }
    }

    runtime_label_changes(node, ctx, &mut changes);
    changes
}

/// Applies label edits to a label map.
pub fn apply_label_changes(labels: &mut BTreeMap<String, String>, changes: &LabelChanges) {
    for (key, value) in changes {
        match value {
            Some(v) => {
                labels.insert(key.clone(), v.clone());
            }
            None => {
                labels.remove(key);
            }
        }
    }
}

/// Converges GPU-state labels on every node.
///
/// Nodes are handled in order. The first failed update aborts the pass; the
/// next reconcile picks up where this one stopped.
pub async fn reconcile_node_labels(
    client: &dyn ClusterClientTrait,
    nodes: &[Node],
    ctx: &LabelContext,
) -> Result<LabelSummary, ControllerError> {
    let mut summary = LabelSummary::default();

    for node in nodes {
        let name = node.name_any();
        if has_nfd_labels(node.labels()) {
            summary.has_nfd_labels = true;
        }
        if has_gpu_labels(node.labels()) {
            summary.gpu_nodes += 1;
        }

        let changes = desired_label_changes(node, ctx);
        if changes.is_empty() {
            debug!(node = %name, "Node labels up to date");
            continue;
        }

        let mut updated = node.clone();
        apply_label_changes(updated.labels_mut(), &changes);
        client.update_node(&updated).await?;
        summary.updated += 1;
        info!(node = %name, changes = ?changes, "Updated GPU state labels");
    }

    Ok(summary)
}

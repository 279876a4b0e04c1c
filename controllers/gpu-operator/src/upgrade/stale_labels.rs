//! Upgrade label garbage collection
//!
//! Failures are logged and skipped; a later pass picks the node up again.

use std::collections::BTreeMap;

use cluster_client::ClusterClientTrait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::labels::UPGRADE_STATE;
use crate::upgrade::state_manager::{ClusterUpgradeState, INITIAL_UNSCHEDULABLE};

/// True when the DaemonSet's nodeSelector targets the node.
fn targets(ds: &DaemonSet, node: &Node) -> bool {
    let selector = ds
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.node_selector.as_ref());
    let labels = node.labels();
    selector.is_none_or(|sel| sel.iter().all(|(k, v)| labels.get(k) == Some(v)))
}

async fn clear_labels(client: &dyn ClusterClientTrait, nodes: Vec<Node>, keys: &[&str]) -> usize {
    let removal: BTreeMap<String, Option<String>> = keys.iter().map(|k| (k.to_string(), None)).collect();
    let mut cleared = 0;
    for node in nodes {
        let name = node.name_any();
        match client.patch_node_labels(&name, &removal).await {
            Ok(()) => {
                info!(node = %name, "Removed driver upgrade label");
                cleared += 1;
            }
            Err(e) => warn!(node = %name, error = %e, "Failed to remove driver upgrade label"),
        }
    }
    cleared
}

async fn labelled_nodes(client: &dyn ClusterClientTrait) -> Vec<Node> {
    match client.list_nodes(Some(UPGRADE_STATE)).await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(error = %e, "Failed to list nodes with upgrade labels");
            Vec::new()
        }
    }
}

/// Removes upgrade labels from nodes no driver DaemonSet targets any more.
///
/// Nodes in the snapshot and nodes a driver DaemonSet still selects keep
/// their labels: their driver pod may simply not be scheduled yet. Only the
/// upgrade state label is removed.
pub async fn remove_stale_upgrade_labels(client: &dyn ClusterClientTrait, state: &ClusterUpgradeState) -> usize {
    let tracked = state.node_names();
    let stale = labelled_nodes(client)
        .await
        .into_iter()
        .filter(|n| !tracked.contains(&n.name_any()))
        .filter(|n| !state.daemonsets.values().any(|ds| targets(ds, n)))
        .collect();
    clear_labels(client, stale, &[UPGRADE_STATE]).await
}

/// Removes upgrade labels everywhere, used when automatic upgrades are off.
///
/// The recorded initial cordon state goes too since no upgrade will finish.
pub async fn remove_all_upgrade_labels(client: &dyn ClusterClientTrait) -> usize {
    let nodes = labelled_nodes(client).await;
    clear_labels(client, nodes, &[UPGRADE_STATE, INITIAL_UNSCHEDULABLE]).await
}

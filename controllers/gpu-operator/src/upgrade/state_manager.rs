//! Node-by-node driver upgrade state machine
//!
//! Every GPU node running a driver pod carries its upgrade state in the
//! `nvidia.com/gpu-driver-upgrade-state` label. A pass reads the cluster into
//! a [`ClusterUpgradeState`] snapshot and then advances each node as far as it
//! can go, chaining transitions that need no waiting within the same pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cluster_client::ClusterClientTrait;
use crds::DriverUpgradePolicySpec;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::labels::{TRUE, UPGRADE_STATE};
use crate::upgrade::coordinator::{Occupancy, drain_pod_selector, upgrade_slots};

/// DaemonSet pods record the template generation they were created from
pub const POD_TEMPLATE_GENERATION: &str = "pod-template-generation";

/// Validator pods that must be ready before a node is uncordoned
pub const VALIDATOR_SELECTOR: &str = "app=nvidia-operator-validator";

/// Set when a node was already cordoned before its upgrade started
pub const INITIAL_UNSCHEDULABLE: &str = "nvidia.com/gpu-driver-upgrade.node-initial-state.unschedulable";

/// Driver container restarts after which the upgrade is marked failed
pub const MAX_DRIVER_RESTARTS: i32 = 10;

/// Upgrade state of one node, stored in the `UPGRADE_STATE` label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpgradeState {
    Unknown,
    Required,
    CordonRequired,
    WaitForJobsRequired,
    PodDeletionRequired,
    DrainRequired,
    PodRestartRequired,
    ValidationRequired,
    UncordonRequired,
    Done,
    Failed,
}

impl UpgradeState {
    pub const ALL: [UpgradeState; 11] = [
        UpgradeState::Unknown,
        UpgradeState::Required,
        UpgradeState::CordonRequired,
        UpgradeState::WaitForJobsRequired,
        UpgradeState::PodDeletionRequired,
        UpgradeState::DrainRequired,
        UpgradeState::PodRestartRequired,
        UpgradeState::ValidationRequired,
        UpgradeState::UncordonRequired,
        UpgradeState::Done,
        UpgradeState::Failed,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            UpgradeState::Unknown => "",
            UpgradeState::Required => "upgrade-required",
            UpgradeState::CordonRequired => "cordon-required",
            UpgradeState::WaitForJobsRequired => "wait-for-jobs-required",
            UpgradeState::PodDeletionRequired => "pod-deletion-required",
            UpgradeState::DrainRequired => "drain-required",
            UpgradeState::PodRestartRequired => "pod-restart-required",
            UpgradeState::ValidationRequired => "validation-required",
            UpgradeState::UncordonRequired => "uncordon-required",
            UpgradeState::Done => "upgrade-done",
            UpgradeState::Failed => "upgrade-failed",
        }
    }

    /// Unrecognised or missing labels read as `Unknown`.
    pub fn from_label(value: Option<&str>) -> Self {
        value
            .and_then(|v| UpgradeState::ALL.into_iter().find(|s| s.as_label() == v))
            .unwrap_or(UpgradeState::Unknown)
    }

    /// Between cordon and uncordon
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            UpgradeState::CordonRequired
                | UpgradeState::WaitForJobsRequired
                | UpgradeState::PodDeletionRequired
                | UpgradeState::DrainRequired
                | UpgradeState::PodRestartRequired
                | UpgradeState::ValidationRequired
                | UpgradeState::UncordonRequired
        )
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeState::Unknown => f.write_str("unknown"),
            other => f.write_str(other.as_label()),
        }
    }
}

fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

fn pod_finished(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.owner_references().iter().any(|o| o.kind == "DaemonSet")
}

/// Requests or limits an NVIDIA GPU or MIG slice.
fn uses_gpu(pod: &Pod) -> bool {
    let is_gpu = |name: &String| name.starts_with("nvidia.com/gpu") || name.starts_with("nvidia.com/mig-");
    pod.spec.iter().flat_map(|s| s.containers.iter()).any(|c| {
        c.resources.as_ref().is_some_and(|r| {
            r.limits.iter().flat_map(|l| l.keys()).any(is_gpu) || r.requests.iter().flat_map(|l| l.keys()).any(is_gpu)
        })
    })
}

/// One node with its driver pod
#[derive(Debug, Clone)]
pub struct NodeUpgradeState {
    pub node: Node,
    pub driver_pod: Pod,
    /// DaemonSet owning the driver pod; `None` for orphaned pods
    pub driver_daemonset: Option<DaemonSet>,
}

impl NodeUpgradeState {
    pub fn name(&self) -> String {
        self.node.name_any()
    }

    pub fn state(&self) -> UpgradeState {
        UpgradeState::from_label(self.node.labels().get(UPGRADE_STATE).map(String::as_str))
    }

    pub fn is_unschedulable(&self) -> bool {
        self.node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false)
    }

    fn initially_unschedulable(&self) -> bool {
        self.node.labels().get(INITIAL_UNSCHEDULABLE).map(String::as_str) == Some(TRUE)
    }

    /// Driver pod runs the DaemonSet's current template.
    pub fn driver_up_to_date(&self) -> bool {
        let Some(generation) = self.driver_daemonset.as_ref().and_then(|ds| ds.metadata.generation) else {
            return false;
        };
        self.driver_pod.labels().get(POD_TEMPLATE_GENERATION) == Some(&generation.to_string())
    }

    pub fn driver_ready(&self) -> bool {
        pod_ready(&self.driver_pod)
    }

    fn driver_restarts(&self) -> i32 {
        self.driver_pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|c| c.restart_count).max().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Snapshot of every driver node, grouped by upgrade state
#[derive(Debug, Clone, Default)]
pub struct ClusterUpgradeState {
    pub namespace: String,
    pub node_states: BTreeMap<UpgradeState, Vec<NodeUpgradeState>>,
    /// Driver DaemonSets, by name
    pub daemonsets: BTreeMap<String, DaemonSet>,
}

impl ClusterUpgradeState {
    pub fn nodes(&self) -> impl Iterator<Item = &NodeUpgradeState> {
        self.node_states.values().flatten()
    }

    pub fn count(&self, state: UpgradeState) -> usize {
        self.node_states.get(&state).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.node_states.values().map(Vec::len).sum()
    }

    pub fn node_names(&self) -> BTreeSet<String> {
        self.nodes().map(NodeUpgradeState::name).collect()
    }

    fn occupancy(&self) -> Occupancy {
        let in_progress = self.nodes().filter(|n| n.state().is_in_progress()).count();
        let idle_cordoned = self
            .nodes()
            .filter(|n| !n.state().is_in_progress() && n.state() != UpgradeState::Failed && n.is_unschedulable())
            .count();
        Occupancy {
            total: self.total(),
            in_progress,
            unavailable: in_progress + self.count(UpgradeState::Failed) + idle_cordoned,
        }
    }
}

/// Node counts after a pass, for metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeSummary {
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
    /// Upgrade slots left unused
    pub available: usize,
}

impl UpgradeSummary {
    fn record(&mut self, state: UpgradeState) {
        match state {
            UpgradeState::Done => self.done += 1,
            UpgradeState::Failed => self.failed += 1,
            UpgradeState::Required => self.pending += 1,
            s if s.is_in_progress() => self.in_progress += 1,
            _ => {}
        }
    }
}

/// Builds and advances the cluster upgrade state
#[async_trait]
pub trait UpgradeStateManager: Send + Sync {
    /// Reads driver pods matching `driver_selector` and their nodes.
    async fn build_state(&self, namespace: &str, driver_selector: &str) -> Result<ClusterUpgradeState, ControllerError>;

    /// Advances every node as far as the policy allows.
    async fn apply_state(
        &self,
        state: &ClusterUpgradeState,
        policy: &DriverUpgradePolicySpec,
    ) -> Result<UpgradeSummary, ControllerError>;
}

/// [`UpgradeStateManager`] backed by the cluster client
pub struct NodeUpgradeStateManager {
    client: Arc<dyn ClusterClientTrait>,
}

impl NodeUpgradeStateManager {
    pub fn new(client: Arc<dyn ClusterClientTrait>) -> Self {
        Self { client }
    }

    async fn set_state(&self, node: &str, state: UpgradeState) -> Result<(), ControllerError> {
        let labels = BTreeMap::from([(UPGRADE_STATE.to_string(), Some(state.as_label().to_string()))]);
        self.client.patch_node_labels(node, &labels).await?;
        info!(node = %node, state = %state, "Driver upgrade state changed");
        Ok(())
    }

    /// Next state for the node, or `None` while it has to wait.
    async fn transition(
        &self,
        namespace: &str,
        node: &NodeUpgradeState,
        current: UpgradeState,
        policy: &DriverUpgradePolicySpec,
        slots: &mut usize,
    ) -> Result<Option<UpgradeState>, ControllerError> {
        let name = node.name();
        match current {
            UpgradeState::Unknown | UpgradeState::Done => {
                if !node.driver_up_to_date() {
                    Ok(Some(UpgradeState::Required))
                } else if current == UpgradeState::Unknown {
                    Ok(Some(UpgradeState::Done))
                } else {
                    Ok(None)
                }
            }
            UpgradeState::Required => {
                if *slots == 0 {
                    debug!(node = %name, "No upgrade slot available");
                    return Ok(None);
                }
                *slots -= 1;
                Ok(Some(UpgradeState::CordonRequired))
            }
            UpgradeState::CordonRequired => {
                if node.is_unschedulable() {
                    let labels = BTreeMap::from([(INITIAL_UNSCHEDULABLE.to_string(), Some(TRUE.to_string()))]);
                    self.client.patch_node_labels(&name, &labels).await?;
                } else {
                    self.client.set_node_unschedulable(&name, true).await?;
                }
                Ok(Some(UpgradeState::WaitForJobsRequired))
            }
            UpgradeState::WaitForJobsRequired => {
                let selector = policy
                    .wait_for_completion
                    .as_ref()
                    .and_then(|w| w.pod_selector.as_deref())
                    .filter(|s| !s.is_empty());
                if let Some(selector) = selector {
                    let pods = self.client.list_pods(None, Some(selector), Some(&name)).await?;
                    let running = pods.iter().filter(|p| !pod_finished(p)).count();
                    if running > 0 {
                        info!(node = %name, running, "Waiting for workloads to complete");
                        return Ok(None);
                    }
                }
                Ok(Some(UpgradeState::PodDeletionRequired))
            }
            UpgradeState::PodDeletionRequired => {
                if policy.pod_deletion.is_some() {
                    for pod in self.client.list_pods(None, None, Some(&name)).await? {
                        if uses_gpu(&pod) && !pod_finished(&pod) {
                            let pod_ns = pod.namespace().unwrap_or_default();
                            self.client.delete_pod(&pod_ns, &pod.name_any()).await?;
                            debug!(node = %name, pod = %pod.name_any(), "Deleted GPU pod");
                        }
                    }
                }
                Ok(Some(UpgradeState::DrainRequired))
            }
            UpgradeState::DrainRequired => {
                let drain = policy.drain.as_ref();
                if drain.and_then(|d| d.enable).unwrap_or(false) {
                    let selector = drain_pod_selector(drain);
                    for pod in self.client.list_pods(None, Some(&selector), Some(&name)).await? {
                        if is_daemonset_pod(&pod) || pod_finished(&pod) {
                            continue;
                        }
                        let pod_ns = pod.namespace().unwrap_or_default();
                        if let Err(e) = self.client.evict_pod(&pod_ns, &pod.name_any()).await {
                            warn!(node = %name, pod = %pod.name_any(), error = %e, "Drain failed");
                            return Ok(Some(UpgradeState::Failed));
                        }
                    }
                }
                Ok(Some(UpgradeState::PodRestartRequired))
            }
            UpgradeState::PodRestartRequired => {
                if !node.driver_up_to_date() {
                    let pod = &node.driver_pod;
                    self.client
                        .delete_pod(&pod.namespace().unwrap_or_default(), &pod.name_any())
                        .await?;
                    info!(node = %name, pod = %pod.name_any(), "Restarting driver pod");
                    return Ok(None);
                }
                if node.driver_restarts() > MAX_DRIVER_RESTARTS {
                    warn!(node = %name, "Driver pod keeps restarting");
                    return Ok(Some(UpgradeState::Failed));
                }
                Ok(node.driver_ready().then_some(UpgradeState::ValidationRequired))
            }
            UpgradeState::ValidationRequired => {
                let validators = self
                    .client
                    .list_pods(Some(namespace), Some(VALIDATOR_SELECTOR), Some(&name))
                    .await?;
                Ok(validators
                    .iter()
                    .all(pod_ready)
                    .then_some(UpgradeState::UncordonRequired))
            }
            UpgradeState::UncordonRequired => {
                if node.initially_unschedulable() {
                    let labels = BTreeMap::from([(INITIAL_UNSCHEDULABLE.to_string(), None)]);
                    self.client.patch_node_labels(&name, &labels).await?;
                } else {
                    self.client.set_node_unschedulable(&name, false).await?;
                }
                Ok(Some(UpgradeState::Done))
            }
            UpgradeState::Failed => {
                let recovered = node.driver_up_to_date() && node.driver_ready();
                Ok(recovered.then_some(UpgradeState::UncordonRequired))
            }
        }
    }
}

#[async_trait]
impl UpgradeStateManager for NodeUpgradeStateManager {
    async fn build_state(&self, namespace: &str, driver_selector: &str) -> Result<ClusterUpgradeState, ControllerError> {
        let mut daemonsets: BTreeMap<String, DaemonSet> = self
            .client
            .list_daemonsets(namespace, Some(driver_selector))
            .await?
            .into_iter()
            .map(|ds| (ds.name_any(), ds))
            .collect();

        let mut pods = self.client.list_pods(Some(namespace), Some(driver_selector), None).await?;
        pods.sort_by_key(|p| p.spec.as_ref().and_then(|s| s.node_name.clone()));

        let mut state = ClusterUpgradeState {
            namespace: namespace.to_string(),
            ..Default::default()
        };
        for pod in pods {
            let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) else {
                debug!(pod = %pod.name_any(), "Driver pod not scheduled yet");
                continue;
            };
            let node = match self.client.get_node(&node_name).await {
                Ok(node) => node,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };

            let owner = pod
                .owner_references()
                .iter()
                .find(|o| o.kind == "DaemonSet")
                .map(|o| o.name.clone());
            let mut driver_daemonset = owner.as_ref().and_then(|name| daemonsets.get(name).cloned());
            if driver_daemonset.is_none() {
                if let Some(name) = &owner {
                    driver_daemonset = self.client.get_daemonset(namespace, name).await?;
                    if let Some(ds) = &driver_daemonset {
                        daemonsets.insert(name.clone(), ds.clone());
                    }
                }
            }

            let node_state = NodeUpgradeState {
                node,
                driver_pod: pod,
                driver_daemonset,
            };
            state.node_states.entry(node_state.state()).or_default().push(node_state);
        }
        state.daemonsets = daemonsets;
        Ok(state)
    }

    async fn apply_state(
        &self,
        state: &ClusterUpgradeState,
        policy: &DriverUpgradePolicySpec,
    ) -> Result<UpgradeSummary, ControllerError> {
        let mut slots = upgrade_slots(policy, state.occupancy())?;
        let mut summary = UpgradeSummary::default();

        for node in state.nodes() {
            let mut current = node.state();
            for _ in 0..UpgradeState::ALL.len() {
                match self.transition(&state.namespace, node, current, policy, &mut slots).await? {
                    Some(next) if next != current => {
                        self.set_state(&node.name(), next).await?;
                        current = next;
                    }
                    _ => break,
                }
            }
            summary.record(current);
        }
        summary.available = slots;
        Ok(summary)
    }
}

//! Mock ClusterClient for unit testing
//!
//! Stores nodes, pods, DaemonSets and applied manifests in memory. Node
//! updates honour resourceVersion so optimistic-concurrency paths can be
//! exercised without an API server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crds::{ClusterPolicy, ClusterPolicyStatus, NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod};
use kube::ResourceExt;
use kube::core::{Expression, Selector, SelectorExt};

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::models::{ObjectKey, Propagation};

/// Parses the equality and existence clauses the operator sends
/// (`k=v`, `k==v`, `k!=v`, `k`, `!k`). Empty strings select everything.
fn parse_selector(raw: &str) -> Selector {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|clause| {
            if let Some((k, v)) = clause.split_once("!=") {
                Expression::NotEqual(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = clause.split_once("==") {
                Expression::Equal(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = clause.split_once('=') {
                Expression::Equal(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = clause.strip_prefix('!') {
                Expression::DoesNotExist(k.trim().to_string())
            } else {
                Expression::Exists(clause.to_string())
            }
        })
        .collect()
}

/// Mutating call recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    UpdateNode(String),
    PatchNodeLabels(String, BTreeMap<String, Option<String>>),
    SetUnschedulable(String, bool),
    DeletePod(String, String),
    EvictPod(String, String),
    DeleteDaemonSet(String, String, Propagation),
    Apply(ObjectKey),
    Delete(ObjectKey),
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    openshift_version: Arc<Mutex<Option<String>>>,
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    pods: Arc<Mutex<Vec<Pod>>>,
    daemonsets: Arc<Mutex<BTreeMap<(String, String), DaemonSet>>>,
    objects: Arc<Mutex<BTreeMap<ObjectKey, serde_json::Value>>>,
    cluster_policies: Arc<Mutex<BTreeMap<String, ClusterPolicy>>>,
    nvidia_drivers: Arc<Mutex<BTreeMap<String, NVIDIADriver>>>,
    // Nodes whose label patches fail
    failing_nodes: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

fn bump_resource_version(node: &mut Node) {
    let next = node
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    node.metadata.resource_version = Some(next.to_string());
}

impl MockClusterClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend to be an OpenShift cluster of the given version
    pub fn set_openshift_version(&self, version: impl Into<String>) {
        *self.openshift_version.lock().unwrap() = Some(version.into());
    }

    /// Add a node to the mock store (for test setup)
    pub fn add_node(&self, mut node: Node) {
        if node.metadata.resource_version.is_none() {
            bump_resource_version(&mut node);
        }
        self.nodes.lock().unwrap().insert(node.name_any(), node);
    }

    /// Add a pod to the mock store (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    /// Add or replace a DaemonSet (for test setup)
    pub fn add_daemonset(&self, ds: DaemonSet) {
        let key = (ds.namespace().unwrap_or_default(), ds.name_any());
        self.daemonsets.lock().unwrap().insert(key, ds);
    }

    /// Add a ClusterPolicy (for test setup)
    pub fn add_cluster_policy(&self, cp: ClusterPolicy) {
        self.cluster_policies.lock().unwrap().insert(cp.name_any(), cp);
    }

    /// Add an NVIDIADriver (for test setup)
    pub fn add_nvidia_driver(&self, nd: NVIDIADriver) {
        self.nvidia_drivers.lock().unwrap().insert(nd.name_any(), nd);
    }

    /// Make label patches against this node fail
    pub fn fail_label_patches_for(&self, node: &str) {
        self.failing_nodes.lock().unwrap().insert(node.to_string());
    }

    /// Current copy of a node
    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    /// Current labels of a node
    pub fn node_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.node(name).map(|n| n.labels().clone()).unwrap_or_default()
    }

    /// Remaining pods
    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().clone()
    }

    /// Applied object by key
    pub fn object(&self, key: &ObjectKey) -> Option<serde_json::Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// All applied objects
    pub fn objects(&self) -> BTreeMap<ObjectKey, serde_json::Value> {
        self.objects.lock().unwrap().clone()
    }

    /// Last status written to a ClusterPolicy
    pub fn cluster_policy_status(&self, name: &str) -> Option<ClusterPolicyStatus> {
        self.cluster_policies.lock().unwrap().get(name).and_then(|cp| cp.status.clone())
    }

    /// Last status written to an NVIDIADriver
    pub fn nvidia_driver_status(&self, name: &str) -> Option<NVIDIADriverStatus> {
        self.nvidia_drivers.lock().unwrap().get(name).and_then(|nd| nd.status.clone())
    }

    /// Mutating calls in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn openshift_version(&self) -> Result<Option<String>, ClusterError> {
        Ok(self.openshift_version.lock().unwrap().clone())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let selector = parse_selector(label_selector.unwrap_or(""));
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| selector.matches(n.labels()))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        self.node(name)
            .ok_or_else(|| ClusterError::NotFound(format!("node {}", name)))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        let name = node.name_any();
        let mut nodes = self.nodes.lock().unwrap();
        let current = nodes
            .get(&name)
            .ok_or_else(|| ClusterError::NotFound(format!("node {}", name)))?;
        if current.metadata.resource_version != node.metadata.resource_version {
            return Err(ClusterError::Conflict(format!("node {}", name)));
        }
        let mut updated = node.clone();
        bump_resource_version(&mut updated);
        nodes.insert(name.clone(), updated.clone());
        drop(nodes);
        self.record(MockCall::UpdateNode(name));
        Ok(updated)
    }

    async fn patch_node_labels(&self, name: &str, labels: &BTreeMap<String, Option<String>>) -> Result<(), ClusterError> {
        if self.failing_nodes.lock().unwrap().contains(name) {
            return Err(ClusterError::Conflict(format!("injected failure for node {}", name)));
        }
        {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::NotFound(format!("node {}", name)))?;
            let current = node.labels_mut();
            for (k, v) in labels {
                match v {
                    Some(v) => {
                        current.insert(k.clone(), v.clone());
                    }
                    None => {
                        current.remove(k);
                    }
                }
            }
            bump_resource_version(node);
        }
        self.record(MockCall::PatchNodeLabels(name.to_string(), labels.clone()));
        Ok(())
    }

    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), ClusterError> {
        {
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::NotFound(format!("node {}", name)))?;
            node.spec.get_or_insert_with(NodeSpec::default).unschedulable = Some(unschedulable);
            bump_resource_version(node);
        }
        self.record(MockCall::SetUnschedulable(name.to_string(), unschedulable));
        Ok(())
    }

    async fn list_pods(&self, namespace: Option<&str>, label_selector: Option<&str>, node_name: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        let selector = parse_selector(label_selector.unwrap_or(""));
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| namespace.is_none() || p.namespace().as_deref() == namespace)
            .filter(|p| selector.matches(p.labels()))
            .filter(|p| {
                node_name.is_none()
                    || p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == node_name
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods
            .lock()
            .unwrap()
            .retain(|p| !(p.namespace().as_deref() == Some(namespace) && p.name_any() == name));
        self.record(MockCall::DeletePod(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods
            .lock()
            .unwrap()
            .retain(|p| !(p.namespace().as_deref() == Some(namespace) && p.name_any() == name));
        self.record(MockCall::EvictPod(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list_daemonsets(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<DaemonSet>, ClusterError> {
        let selector = parse_selector(label_selector.unwrap_or(""));
        Ok(self
            .daemonsets
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), ds)| ns == namespace && selector.matches(ds.labels()))
            .map(|(_, ds)| ds.clone())
            .collect())
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        Ok(self
            .daemonsets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str, propagation: Propagation) -> Result<(), ClusterError> {
        self.daemonsets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        self.objects.lock().unwrap().retain(|k, _| {
            !(k.kind == "DaemonSet" && k.name == name && k.namespace.as_deref() == Some(namespace))
        });
        self.record(MockCall::DeleteDaemonSet(namespace.to_string(), name.to_string(), propagation));
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        let key = ObjectKey {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        };
        match self.object(&key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn apply_object(&self, object: &serde_json::Value) -> Result<(), ClusterError> {
        let key = ObjectKey::from_value(object)
            .ok_or_else(|| ClusterError::InvalidObject("missing apiVersion, kind or metadata.name".to_string()))?;
        if key.kind == "DaemonSet" {
            // Keep typed DaemonSets queryable; keep a prior status if present
            let mut ds: DaemonSet = serde_json::from_value(object.clone())?;
            let ns_name = (key.namespace.clone().unwrap_or_default(), key.name.clone());
            let mut daemonsets = self.daemonsets.lock().unwrap();
            if let Some(existing) = daemonsets.get(&ns_name) {
                ds.status = existing.status.clone();
            }
            daemonsets.insert(ns_name, ds);
        }
        self.objects.lock().unwrap().insert(key.clone(), object.clone());
        self.record(MockCall::Apply(key));
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        self.objects.lock().unwrap().remove(key);
        if key.kind == "DaemonSet" {
            self.daemonsets
                .lock()
                .unwrap()
                .remove(&(key.namespace.clone().unwrap_or_default(), key.name.clone()));
        }
        self.record(MockCall::Delete(key.clone()));
        Ok(())
    }

    async fn list_cluster_policies(&self) -> Result<Vec<ClusterPolicy>, ClusterError> {
        Ok(self.cluster_policies.lock().unwrap().values().cloned().collect())
    }

    async fn patch_cluster_policy_status(&self, name: &str, status: &ClusterPolicyStatus) -> Result<(), ClusterError> {
        let mut policies = self.cluster_policies.lock().unwrap();
        let cp = policies
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound(format!("clusterpolicy {}", name)))?;
        cp.status = Some(status.clone());
        Ok(())
    }

    async fn list_nvidia_drivers(&self) -> Result<Vec<NVIDIADriver>, ClusterError> {
        Ok(self.nvidia_drivers.lock().unwrap().values().cloned().collect())
    }

    async fn patch_nvidia_driver_status(&self, name: &str, status: &NVIDIADriverStatus) -> Result<(), ClusterError> {
        let mut drivers = self.nvidia_drivers.lock().unwrap();
        let nd = drivers
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound(format!("nvidiadriver {}", name)))?;
        nd.status = Some(status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_update_node_rejects_stale_resource_version() {
        let mock = MockClusterClient::new();
        mock.add_node(node("gpu-1"));

        let first = mock.get_node("gpu-1").await.unwrap();
        let stale = first.clone();
        mock.update_node(&first).await.unwrap();

        let err = mock.update_node(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_patch_node_labels_sets_and_removes() {
        let mock = MockClusterClient::new();
        mock.add_node(node("gpu-1"));

        let mut patch = BTreeMap::new();
        patch.insert("a".to_string(), Some("1".to_string()));
        patch.insert("b".to_string(), Some("2".to_string()));
        mock.patch_node_labels("gpu-1", &patch).await.unwrap();

        let mut remove = BTreeMap::new();
        remove.insert("a".to_string(), None);
        mock.patch_node_labels("gpu-1", &remove).await.unwrap();

        let labels = mock.node_labels("gpu-1");
        assert!(!labels.contains_key("a"));
        assert_eq!(labels.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_list_nodes_filters_by_selector() {
        let mock = MockClusterClient::new();
        let mut gpu = node("gpu-1");
        gpu.labels_mut().insert("nvidia.com/gpu.present".into(), "true".into());
        mock.add_node(gpu);
        mock.add_node(node("cpu-1"));

        let nodes = mock.list_nodes(Some("nvidia.com/gpu.present=true")).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name_any(), "gpu-1");
        assert_eq!(mock.list_nodes(None).await.unwrap().len(), 2);
    }

    #[test]
    fn test_selector_clauses() {
        let labels = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        let sel = parse_selector("app=nvidia-driver-daemonset,nvidia.com/gpu-driver-upgrade-drain.skip!=true");
        assert!(sel.matches(&labels(&[("app", "nvidia-driver-daemonset")])));
        assert!(!sel.matches(&labels(&[
            ("app", "nvidia-driver-daemonset"),
            ("nvidia.com/gpu-driver-upgrade-drain.skip", "true"),
        ])));

        let sel = parse_selector("nvidia.com/gpu.present, !node-role.kubernetes.io/control-plane");
        assert!(sel.matches(&labels(&[("nvidia.com/gpu.present", "true")])));
        assert!(!sel.matches(&labels(&[
            ("nvidia.com/gpu.present", "true"),
            ("node-role.kubernetes.io/control-plane", ""),
        ])));

        assert!(parse_selector(" , ").selects_all());
    }
}

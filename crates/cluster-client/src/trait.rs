//! ClusterClient trait for mocking
//!
//! The controllers only see the cluster through this trait. `KubeClusterClient`
//! implements it over a live API server and `MockClusterClient` keeps
//! everything in memory for unit tests.

use std::collections::BTreeMap;

use crds::{ClusterPolicy, ClusterPolicyStatus, NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod};

use crate::error::ClusterError;
use crate::models::{ObjectKey, Propagation};

/// Trait for Kubernetes API operations used by the operator
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// OpenShift cluster version, `None` on vanilla Kubernetes
    async fn openshift_version(&self) -> Result<Option<String>, ClusterError>;

    // Nodes
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError>;
    async fn get_node(&self, name: &str) -> Result<Node, ClusterError>;
    /// Replaces the node; fails with a conflict when its resourceVersion is stale.
    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError>;
    /// Merge-patches node labels. `None` values remove the label.
    async fn patch_node_labels(&self, name: &str, labels: &BTreeMap<String, Option<String>>) -> Result<(), ClusterError>;
    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), ClusterError>;

    // Pods
    async fn list_pods(&self, namespace: Option<&str>, label_selector: Option<&str>, node_name: Option<&str>) -> Result<Vec<Pod>, ClusterError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // DaemonSets
    async fn list_daemonsets(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<DaemonSet>, ClusterError>;
    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError>;
    async fn delete_daemonset(&self, namespace: &str, name: &str, propagation: Propagation) -> Result<(), ClusterError>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError>;

    // Arbitrary manifests
    /// Server-side applies an object of any kind.
    async fn apply_object(&self, object: &serde_json::Value) -> Result<(), ClusterError>;
    /// Deletes an object of any kind. Absent objects are not an error.
    async fn delete_object(&self, key: &ObjectKey) -> Result<(), ClusterError>;

    // Custom resources
    async fn list_cluster_policies(&self) -> Result<Vec<ClusterPolicy>, ClusterError>;
    async fn patch_cluster_policy_status(&self, name: &str, status: &ClusterPolicyStatus) -> Result<(), ClusterError>;
    async fn list_nvidia_drivers(&self) -> Result<Vec<NVIDIADriver>, ClusterError>;
    async fn patch_nvidia_driver_status(&self, name: &str, status: &NVIDIADriverStatus) -> Result<(), ClusterError>;
}

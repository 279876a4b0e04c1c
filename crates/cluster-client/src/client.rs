//! Kubernetes-backed implementation of `ClusterClientTrait`

use std::collections::BTreeMap;

use crds::{ClusterPolicy, ClusterPolicyStatus, NVIDIADriver, NVIDIADriverStatus};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, EvictParams, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams, PropagationPolicy,
};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::cluster_trait::ClusterClientTrait;
use crate::error::{is_status, ClusterError};
use crate::models::{ObjectKey, Propagation};

/// Field manager recorded on server-side applied objects
pub const FIELD_MANAGER: &str = "gpu-operator";

/// Cluster client over a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying kube client, used by the watchers
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn dynamic_api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        let (group, version) = key.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &key.kind);
        let ar = match irregular_plural(&key.kind) {
            Some(plural) => ApiResource::from_gvk_with_plural(&gvk, plural),
            None => ApiResource::from_gvk(&gvk),
        };
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Kinds whose resource name is not derivable from the kind.
fn irregular_plural(kind: &str) -> Option<&'static str> {
    match kind {
        "SecurityContextConstraints" => Some("securitycontextconstraints"),
        _ => None,
    }
}

fn list_params(label_selector: Option<&str>, field_selector: Option<&str>) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = label_selector {
        lp = lp.labels(labels);
    }
    if let Some(fields) = field_selector {
        lp = lp.fields(fields);
    }
    lp
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 404) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn openshift_version(&self) -> Result<Option<String>, ClusterError> {
        let gvk = GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ApiResource::from_gvk(&gvk));

        let cv = match api.get_opt("version").await {
            Ok(Some(cv)) => cv,
            Ok(None) => return Ok(None),
            // API group absent on vanilla Kubernetes
            Err(e) if is_status(&e, 404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let history = cv
            .data
            .pointer("/status/history")
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();
        let completed = history
            .iter()
            .find(|h| h.get("state").and_then(|s| s.as_str()) == Some("Completed"))
            .or_else(|| history.first())
            .and_then(|h| h.get("version"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        // A ClusterVersion without history still means OpenShift
        Ok(Some(completed.unwrap_or_default()))
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&list_params(label_selector, None)).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound(format!("node {}", name)))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let name = node.name_any();
        match api.replace(&name, &PostParams::default(), node).await {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 409) => Err(ClusterError::Conflict(format!("node {}", name))),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_node_labels(&self, name: &str, labels: &BTreeMap<String, Option<String>>) -> Result<(), ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        debug!(node = %name, changes = labels.len(), "Patched node labels");
        Ok(())
    }

    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<(), ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: Option<&str>, label_selector: Option<&str>, node_name: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        let field_selector = node_name.map(|n| format!("spec.nodeName={}", n));
        let lp = list_params(label_selector, field_selector.as_deref());
        Ok(self.pods(namespace).list(&lp).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        ignore_not_found(self.pods(Some(namespace)).delete(name, &DeleteParams::default()).await)
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        ignore_not_found(self.pods(Some(namespace)).evict(name, &EvictParams::default()).await)
    }

    async fn list_daemonsets(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<DaemonSet>, ClusterError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&list_params(label_selector, None)).await?.items)
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str, propagation: Propagation) -> Result<(), ClusterError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams {
            propagation_policy: Some(match propagation {
                Propagation::Background => PropagationPolicy::Background,
                Propagation::Orphan => PropagationPolicy::Orphan,
            }),
            ..DeleteParams::default()
        };
        ignore_not_found(api.delete(name, &dp).await)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_object(&self, object: &serde_json::Value) -> Result<(), ClusterError> {
        let key = ObjectKey::from_value(object)
            .ok_or_else(|| ClusterError::InvalidObject("missing apiVersion, kind or metadata.name".to_string()))?;
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        self.dynamic_api(&key)
            .patch(&key.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&obj))
            .await?;
        debug!(object = %key, "Applied object");
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        ignore_not_found(self.dynamic_api(key).delete(&key.name, &DeleteParams::default()).await)?;
        debug!(object = %key, "Deleted object");
        Ok(())
    }

    async fn list_cluster_policies(&self) -> Result<Vec<ClusterPolicy>, ClusterError> {
        let api: Api<ClusterPolicy> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_cluster_policy_status(&self, name: &str, status: &ClusterPolicyStatus) -> Result<(), ClusterError> {
        let api: Api<ClusterPolicy> = Api::all(self.client.clone());
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn list_nvidia_drivers(&self) -> Result<Vec<NVIDIADriver>, ClusterError> {
        let api: Api<NVIDIADriver> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_nvidia_driver_status(&self, name: &str, status: &NVIDIADriverStatus) -> Result<(), ClusterError> {
        let api: Api<NVIDIADriver> = Api::all(self.client.clone());
        let patch = json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }
}

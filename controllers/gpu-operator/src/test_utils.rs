//! Builders shared by unit tests

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cluster_client::MockClusterClient;
use crds::{ClusterPolicy, ClusterPolicySpec, NVIDIADriver, NVIDIADriverSpec};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{Container, Node, NodeStatus, NodeSystemInfo, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use crate::config::{IMAGE_ENV_VARS, OperatorConfig};
use crate::context::OperatorContext;
use crate::manifests::Catalog;
use crate::metrics::OperatorMetrics;
use crate::transforms::common::IMAGE_PLACEHOLDER;

pub const TEST_NAMESPACE: &str = "gpu-operator";

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn node(name: &str, pairs: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(pairs)),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn node_with_runtime(name: &str, runtime_version: &str) -> Node {
    let mut node = node(name, &[]);
    node.status = Some(NodeStatus {
        node_info: Some(NodeSystemInfo {
            container_runtime_version: runtime_version.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    });
    node
}

/// Node with an NVIDIA PCI device as discovered by NFD
pub fn gpu_node(name: &str, runtime_version: &str, pairs: &[(&str, &str)]) -> Node {
    let mut node = node_with_runtime(name, runtime_version);
    let node_labels = node.metadata.labels.get_or_insert_with(Default::default);
    node_labels.insert("feature.node.kubernetes.io/pci-10de.present".into(), "true".into());
    node_labels.extend(labels(pairs));
    node
}

/// DaemonSet template with placeholder images
pub fn daemonset(name: &str, containers: &[&str]) -> DaemonSet {
    let selector = labels(&[("app", name)]);
    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(selector.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: containers
                        .iter()
                        .map(|c| Container {
                            name: c.to_string(),
                            image: Some(IMAGE_PLACEHOLDER.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Configuration with every image fallback set
pub fn test_config() -> OperatorConfig {
    IMAGE_ENV_VARS
        .iter()
        .fold(OperatorConfig::for_tests(TEST_NAMESPACE), |config, env| {
            let image = format!("nvcr.io/nvidia/{}:test", env.trim_end_matches("_IMAGE").to_lowercase().replace('_', "-"));
            config.with_image_fallback(env, &image)
        })
}

/// ClusterPolicy created at `created` (RFC 3339)
pub fn cluster_policy(name: &str, created: &str, spec: ClusterPolicySpec) -> ClusterPolicy {
    let mut cp = ClusterPolicy::new(name, spec);
    cp.metadata.uid = Some(format!("uid-{}", name));
    cp.metadata.creation_timestamp = Some(serde_json::from_value(serde_json::json!(created)).unwrap());
    cp
}

pub fn nvidia_driver(name: &str, selector: &[(&str, &str)]) -> NVIDIADriver {
    let mut nd = NVIDIADriver::new(
        name,
        NVIDIADriverSpec {
            node_selector: labels(selector),
            ..Default::default()
        },
    );
    nd.metadata.uid = Some(format!("uid-{}", name));
    nd
}

pub fn pod(namespace: &str, name: &str, node_name: &str, pairs: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pairs)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod owned by the DaemonSet `owner`
pub fn daemonset_pod(namespace: &str, name: &str, node_name: &str, owner: &str, pairs: &[(&str, &str)]) -> Pod {
    let mut pod = pod(namespace, name, node_name, pairs);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".into(),
        kind: "DaemonSet".into(),
        name: owner.to_string(),
        uid: format!("uid-{}", owner),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

/// The shipped manifest catalog
pub fn shipped_catalog(openshift: bool) -> Catalog {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets");
    Catalog::load(&root, openshift).unwrap()
}

pub fn test_context(mock: &MockClusterClient, catalog: Catalog, openshift_version: Option<&str>) -> Arc<OperatorContext> {
    Arc::new(OperatorContext::new(
        test_config(),
        Arc::new(mock.clone()),
        catalog,
        openshift_version.map(str::to_string),
        Arc::new(OperatorMetrics::new().unwrap()),
    ))
}

//! Unit tests for NVIDIADriver reconciliation

#[cfg(test)]
mod tests {
    use crate::labels::{DRIVER_MANAGED_BY, managed};
    use crate::reconciler::nvidia_driver::*;
    use crate::reconciler::{REQUEUE_INVALID, REQUEUE_NOT_READY};
    use crate::test_utils::*;
    use cluster_client::{ClusterClientTrait, MockCall, MockClusterClient, ObjectKey, Propagation};
    use crds::{CONDITION_READY, ClusterPolicySpec, NVIDIADriver, State};
    use k8s_openapi::api::apps::v1::DaemonSetStatus;
    use kube::ResourceExt;
    use kube_runtime::controller::Action;
    use serde_json::Value;

    const CONTAINERD: &str = "containerd://1.7.0";

    fn crd_policy(mock: &MockClusterClient) {
        let mut spec = ClusterPolicySpec::default();
        spec.driver.use_nvidia_driver_crd = Some(true);
        mock.add_cluster_policy(cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", spec));
    }

    fn add_driver(mock: &MockClusterClient, name: &str, selector: &[(&str, &str)]) -> NVIDIADriver {
        let driver = nvidia_driver(name, selector);
        mock.add_nvidia_driver(driver.clone());
        driver
    }

    fn ds_key(name: &str) -> ObjectKey {
        ObjectKey {
            api_version: "apps/v1".into(),
            kind: "DaemonSet".into(),
            namespace: Some(TEST_NAMESPACE.into()),
            name: name.into(),
        }
    }

    fn ready_reason(mock: &MockClusterClient, name: &str) -> String {
        let status = mock.nvidia_driver_status(name).unwrap();
        status
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_READY)
            .map(|c| c.reason.clone())
            .unwrap()
    }

    #[test]
    fn test_daemonset_name_reflects_driver_type() {
        let mut driver = nvidia_driver("pool-a", &[]);
        assert_eq!(daemonset_name(&driver), "nvidia-gpu-driver-pool-a");
        driver.spec.driver_type = crds::DriverType::VgpuHostManager;
        assert_eq!(daemonset_name(&driver), "nvidia-vgpu-manager-driver-pool-a");
    }

    #[tokio::test]
    async fn test_waits_for_cluster_policy() {
        let mock = MockClusterClient::new();
        let driver = add_driver(&mock, "default", &[]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        let action = reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_NOT_READY));
        assert_eq!(mock.nvidia_driver_status("default").unwrap().state, State::NotReady);
        assert!(mock.objects().is_empty());
    }

    #[tokio::test]
    async fn test_crd_disabled_in_policy() {
        let mock = MockClusterClient::new();
        mock.add_cluster_policy(cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", ClusterPolicySpec::default()));
        let driver = add_driver(&mock, "default", &[]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        let action = reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INVALID));
        assert_eq!(mock.nvidia_driver_status("default").unwrap().state, State::Disabled);
        assert_eq!(ready_reason(&mock, "default"), "NvidiaDriverCRDDisabled");
        assert!(mock.objects().is_empty());
    }

    #[tokio::test]
    async fn test_claims_pool_and_renders_daemonset() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        mock.add_node(gpu_node("gpu-a", CONTAINERD, &[("pool", "a")]));
        mock.add_node(gpu_node("gpu-b", CONTAINERD, &[]));
        mock.add_node(node_with_runtime("cpu", CONTAINERD));
        let driver = add_driver(&mock, "pool-a", &[("pool", "a")]);
        add_driver(&mock, "default", &[]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        let action = reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_NOT_READY));
        assert_eq!(ready_reason(&mock, "pool-a"), "DriverNotReady");

        assert_eq!(mock.node_labels("gpu-a").get(DRIVER_MANAGED_BY).map(String::as_str), Some("pool-a"));
        // Owned by the default instance, claimed on its own reconcile
        assert!(!mock.node_labels("gpu-b").contains_key(DRIVER_MANAGED_BY));
        assert!(!mock.node_labels("cpu").contains_key(DRIVER_MANAGED_BY));

        let ds = mock.object(&ds_key("nvidia-gpu-driver-pool-a")).unwrap();
        assert_eq!(
            ds.pointer("/spec/template/spec/nodeSelector/nvidia.com~1gpu.driver.managed-by"),
            Some(&Value::from("pool-a"))
        );
        assert_eq!(
            ds.pointer("/spec/template/spec/nodeSelector/nvidia.com~1gpu.deploy.driver"),
            Some(&Value::from("true"))
        );
        assert_eq!(ds.pointer("/metadata/ownerReferences/0/name"), Some(&Value::from("pool-a")));
        assert_eq!(ds.pointer("/metadata/ownerReferences/0/kind"), Some(&Value::from("NVIDIADriver")));

        let pod_labels = ds.pointer("/spec/template/metadata/labels").unwrap();
        assert_eq!(pod_labels.get(managed::COMPONENT), Some(&Value::from(DRIVER_COMPONENT)));
        assert_eq!(pod_labels.get(managed::DRIVER_INSTANCE), Some(&Value::from("pool-a")));
        assert_eq!(pod_labels.get("app"), Some(&Value::from("nvidia-gpu-driver-pool-a")));
        assert_eq!(
            ds.pointer("/spec/selector/matchLabels/app"),
            Some(&Value::from("nvidia-gpu-driver-pool-a"))
        );

        let mut rolled = mock.get_daemonset(TEST_NAMESPACE, "nvidia-gpu-driver-pool-a").await.unwrap().unwrap();
        rolled.status = Some(DaemonSetStatus::default());
        mock.add_daemonset(rolled);

        let action = reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert_eq!(action, Action::await_change());
        let status = mock.nvidia_driver_status("pool-a").unwrap();
        assert_eq!(status.state, State::Ready);
        assert_eq!(status.namespace.as_deref(), Some(TEST_NAMESPACE));
    }

    #[tokio::test]
    async fn test_default_instance_takes_over_and_releases() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        mock.add_node(gpu_node("gpu-a", CONTAINERD, &[(DRIVER_MANAGED_BY, "retired")]));
        let driver = add_driver(&mock, "default", &[]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert_eq!(mock.node_labels("gpu-a").get(DRIVER_MANAGED_BY).map(String::as_str), Some("default"));

        // Narrowing the selector releases the node
        let narrowed = add_driver(&mock, "default", &[("pool", "b")]);
        reconcile_nvidia_driver(&ctx, &narrowed).await.unwrap();
        assert!(!mock.node_labels("gpu-a").contains_key(DRIVER_MANAGED_BY));
    }

    #[tokio::test]
    async fn test_claims_released_when_nodes_leave_the_pool() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        let mut lost_gpu = node_with_runtime("lost-gpu", CONTAINERD);
        lost_gpu.labels_mut().insert(DRIVER_MANAGED_BY.into(), "pool-a".into());
        mock.add_node(lost_gpu);
        mock.add_node(gpu_node("relabelled", CONTAINERD, &[("pool", "b"), (DRIVER_MANAGED_BY, "pool-a")]));
        mock.add_node(gpu_node("other-owner", CONTAINERD, &[(DRIVER_MANAGED_BY, "pool-b")]));
        mock.add_node(gpu_node("member", CONTAINERD, &[("pool", "a")]));
        let driver = add_driver(&mock, "pool-a", &[("pool", "a")]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        reconcile_nvidia_driver(&ctx, &driver).await.unwrap();

        assert!(!mock.node_labels("lost-gpu").contains_key(DRIVER_MANAGED_BY));
        assert!(!mock.node_labels("relabelled").contains_key(DRIVER_MANAGED_BY));
        assert_eq!(mock.node_labels("other-owner").get(DRIVER_MANAGED_BY).map(String::as_str), Some("pool-b"));
        assert_eq!(mock.node_labels("member").get(DRIVER_MANAGED_BY).map(String::as_str), Some("pool-a"));
        assert!(mock.calls().contains(&MockCall::UpdateNode("lost-gpu".into())));
    }

    #[tokio::test]
    async fn test_overlapping_selectors_are_rejected() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        mock.add_node(gpu_node("gpu-a", CONTAINERD, &[("pool", "a"), ("zone", "z1")]));
        let driver = add_driver(&mock, "by-pool", &[("pool", "a")]);
        add_driver(&mock, "by-zone", &[("zone", "z1")]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        let err = reconcile_nvidia_driver(&ctx, &driver).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(mock.nvidia_driver_status("by-pool").unwrap().state, State::NotReady);
        assert_eq!(ready_reason(&mock, "by-pool"), "ConflictingNodeSelector");
        assert!(!mock.node_labels("gpu-a").contains_key(DRIVER_MANAGED_BY));
        assert!(mock.objects().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_runtimes_in_pool() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        mock.add_node(gpu_node("gpu-a", CONTAINERD, &[]));
        mock.add_node(gpu_node("gpu-b", "cri-o://1.24.0", &[]));
        let driver = add_driver(&mock, "default", &[]);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        assert!(reconcile_nvidia_driver(&ctx, &driver).await.is_err());
        assert_eq!(ready_reason(&mock, "default"), "ReconcileFailed");
        assert!(mock.objects().is_empty());
    }

    #[tokio::test]
    async fn test_stale_daemonsets_are_deleted() {
        let mock = MockClusterClient::new();
        crd_policy(&mock);
        mock.add_node(gpu_node("gpu-a", CONTAINERD, &[]));
        let mut driver = add_driver(&mock, "default", &[]);
        driver.spec.driver_type = crds::DriverType::Vgpu;
        let ctx = test_context(&mock, shipped_catalog(false), None);

        let mut stale = daemonset("nvidia-gpu-driver-default", &["nvidia-driver-ctr"]);
        stale
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(managed::DRIVER_INSTANCE.to_string(), "default".to_string());
        mock.add_daemonset(stale);

        reconcile_nvidia_driver(&ctx, &driver).await.unwrap();
        assert!(mock.calls().contains(&MockCall::DeleteDaemonSet(
            TEST_NAMESPACE.into(),
            "nvidia-gpu-driver-default".into(),
            Propagation::Background,
        )));
        assert!(mock.get_daemonset(TEST_NAMESPACE, "nvidia-vgpu-driver-default").await.unwrap().is_some());
    }
}

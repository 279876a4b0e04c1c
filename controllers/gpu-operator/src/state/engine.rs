//! Ordered state engine
//!
//! Walks the catalog states in order. Each step applies every control of the
//! current state; an error leaves the index where it was so the next
//! reconcile retries the same state.

use cluster_client::Propagation;
use crds::ClusterPolicy;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::labels::driver_pods;
use crate::manifests::{Kind, StateAssets, StateName};
use crate::node::runtime::Runtime;
use crate::state::controls::{ControlContext, ControlStatus, run_control};
use crate::state::enablement::{control_enabled, state_enabled};
use crate::transforms::{TransformContext, transform_state_daemonset};

pub struct StateEngine<'a> {
    ctx: &'a OperatorContext,
    policy: &'a ClusterPolicy,
    runtime: Runtime,
    index: usize,
}

impl<'a> StateEngine<'a> {
    pub fn new(ctx: &'a OperatorContext, policy: &'a ClusterPolicy, runtime: Runtime) -> Self {
        Self {
            ctx,
            policy,
            runtime,
            index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.ctx.catalog.states.len()
    }

    /// Runs every state from the start and returns the worst result.
    pub async fn run(&mut self) -> Result<ControlStatus, ControllerError> {
        self.index = 0;
        let mut overall = ControlStatus::Disabled;
        while !self.is_done() {
            let (name, status) = self.step().await?;
            debug!(state = %name, status = ?status, "State processed");
            overall = overall.worst(status);
        }
        Ok(overall)
    }

    /// Processes the current state and advances.
    pub async fn step(&mut self) -> Result<(StateName, ControlStatus), ControllerError> {
        let (ctx, policy) = (self.ctx, self.policy);
        let state = ctx
            .catalog
            .states
            .get(self.index)
            .ok_or_else(|| ControllerError::InvalidConfig("state engine stepped past the last state".to_string()))?;
        let spec = &policy.spec;

        if matches!(state.name, StateName::Driver | StateName::VgpuManager) && spec.driver.use_nvidia_driver_crd() {
            self.orphan_driver_daemonsets().await?;
            self.index += 1;
            return Ok((state.name, ControlStatus::Ready));
        }

        let enabled = state_enabled(state.name, spec);
        let control_ctx = ControlContext {
            client: ctx.client.as_ref(),
            namespace: ctx.namespace(),
            owner: policy.controller_owner_ref(&()),
        };

        let mut result = if enabled {
            ControlStatus::Ready
        } else {
            ControlStatus::Disabled
        };
        for kind in &state.controls {
            let kind_enabled = enabled && control_enabled(state.name, *kind, spec);
            let objects = self.render(state, *kind, kind_enabled)?;
            let status = run_control(*kind, objects, kind_enabled, &control_ctx).await?;
            if status == ControlStatus::NotReady {
                result = ControlStatus::NotReady;
            }
        }

        self.index += 1;
        Ok((state.name, result))
    }

    /// Objects of one kind, transformed for the cluster when they will be applied.
    fn render(&self, state: &StateAssets, kind: Kind, transform: bool) -> Result<Vec<Value>, ControllerError> {
        let spec = &self.policy.spec;
        match kind {
            Kind::DaemonSet if transform => {
                let Some(template) = &state.resources.daemon_set else {
                    return Ok(Vec::new());
                };
                let mut ds = template.clone();
                let transform_ctx = TransformContext {
                    config: &self.ctx.config,
                    runtime: self.runtime,
                    openshift: self.ctx.is_openshift(),
                };
                transform_state_daemonset(state.name, &mut ds, spec, &transform_ctx)?;
                Ok(vec![serde_json::to_value(&ds)?])
            }
            Kind::RuntimeClass => {
                let class = spec.operator.runtime_class_name();
                state
                    .resources
                    .runtime_classes
                    .iter()
                    .map(|rc| {
                        let mut rc = rc.clone();
                        rc.metadata.name = Some(class.to_string());
                        rc.handler = class.to_string();
                        serde_json::to_value(&rc).map_err(ControllerError::from)
                    })
                    .collect()
            }
            _ => state.resources.objects(kind),
        }
    }

    /// Hands driver pods over to NVIDIADriver instances without restarting them.
    ///
    /// Every driver DaemonSet owned by a ClusterPolicy goes, whatever its
    /// name and whichever ClusterPolicy instance created it.
    async fn orphan_driver_daemonsets(&self) -> Result<(), ControllerError> {
        let namespace = self.ctx.namespace();
        let driver_daemonsets = self
            .ctx
            .client
            .list_daemonsets(namespace, Some(driver_pods::CRD_SELECTOR))
            .await?;

        for ds in driver_daemonsets {
            let policy_owned = ds.owner_references().iter().any(|o| o.kind == ClusterPolicy::kind(&()));
            if !policy_owned {
                continue;
            }
            let name = ds.name_any();
            info!(daemonset = %name, "Orphaning ClusterPolicy driver DaemonSet for NVIDIADriver management");
            self.ctx
                .client
                .delete_daemonset(namespace, &name, Propagation::Orphan)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_client::{ClusterClientTrait, MockCall, MockClusterClient, ObjectKey};
    use crds::ClusterPolicySpec;
    use crate::labels::managed;
    use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn ds_key(name: &str) -> ObjectKey {
        ObjectKey {
            api_version: "apps/v1".into(),
            kind: "DaemonSet".into(),
            namespace: Some(TEST_NAMESPACE.into()),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_run_visits_every_state() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", ClusterPolicySpec::default());

        let mut engine = StateEngine::new(&ctx, &policy, Runtime::Containerd);
        let status = engine.run().await.unwrap();
        assert!(engine.is_done());
        assert_eq!(engine.index(), StateName::ALL.len());
        // freshly applied DaemonSets have no status yet
        assert_eq!(status, ControlStatus::NotReady);

        let driver = mock.object(&ds_key("nvidia-driver-daemonset")).unwrap();
        assert_eq!(
            driver.pointer("/metadata/ownerReferences/0/uid"),
            Some(&serde_json::json!("uid-cluster-policy"))
        );
        // disabled by default
        assert!(mock.object(&ds_key("nvidia-dcgm")).is_none());
        assert!(mock.object(&ds_key("nvidia-vfio-manager")).is_none());
    }

    #[tokio::test]
    async fn test_ready_once_daemonsets_roll_out() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", ClusterPolicySpec::default());
        StateEngine::new(&ctx, &policy, Runtime::Containerd).run().await.unwrap();

        for (key, _) in mock.objects().into_iter().filter(|(k, _)| k.kind == "DaemonSet") {
            let mut ds = mock.get_daemonset(TEST_NAMESPACE, &key.name).await.unwrap().unwrap();
            ds.status = Some(DaemonSetStatus::default());
            mock.add_daemonset(ds);
        }

        let status = StateEngine::new(&ctx, &policy, Runtime::Containerd).run().await.unwrap();
        assert_eq!(status, ControlStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_step_keeps_index() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let mut spec = ClusterPolicySpec::default();
        // toolkit transform rejects NRI without CDI
        spec.cdi.nri_plugin_enabled = Some(true);
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", spec);

        let mut engine = StateEngine::new(&ctx, &policy, Runtime::Containerd);
        for _ in 0..3 {
            engine.step().await.unwrap();
        }
        let index = engine.index();
        assert!(engine.step().await.is_err());
        assert_eq!(engine.index(), index);
    }

    #[tokio::test]
    async fn test_driver_crd_orphans_owned_daemonset() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", ClusterPolicySpec::default());
        StateEngine::new(&ctx, &policy, Runtime::Containerd).run().await.unwrap();
        assert!(mock.object(&ds_key("nvidia-driver-daemonset")).is_some());
        mock.clear_calls();

        let mut spec = ClusterPolicySpec::default();
        spec.driver.use_nvidia_driver_crd = Some(true);
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", spec);
        StateEngine::new(&ctx, &policy, Runtime::Containerd).run().await.unwrap();

        assert!(mock.calls().contains(&MockCall::DeleteDaemonSet(
            TEST_NAMESPACE.into(),
            "nvidia-driver-daemonset".into(),
            cluster_client::Propagation::Orphan,
        )));
        assert!(!mock.calls().iter().any(|c| matches!(c, MockCall::Apply(k) if k.name == "nvidia-driver-daemonset")));
    }

    fn driver_daemonset(name: &str, owner_kind: &str, owner_uid: &str) -> DaemonSet {
        let mut ds = daemonset(name, &["nvidia-driver-ctr"]);
        ds.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(managed::COMPONENT.to_string(), "nvidia-driver".to_string());
        ds.metadata.owner_references = Some(vec![OwnerReference {
            kind: owner_kind.to_string(),
            uid: owner_uid.to_string(),
            name: "owner".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        ds
    }

    fn orphaned(mock: &MockClusterClient) -> Vec<String> {
        let mut names: Vec<String> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::DeleteDaemonSet(_, name, cluster_client::Propagation::Orphan) => Some(name),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    fn crd_policy() -> ClusterPolicy {
        let mut spec = ClusterPolicySpec::default();
        spec.driver.use_nvidia_driver_crd = Some(true);
        cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", spec)
    }

    #[tokio::test]
    async fn test_driver_crd_orphans_every_policy_owned_driver() {
        let mock = MockClusterClient::new();
        mock.add_daemonset(driver_daemonset("nvidia-driver-daemonset-legacy", "ClusterPolicy", "uid-cluster-policy"));
        mock.add_daemonset(driver_daemonset("nvidia-driver-daemonset", "ClusterPolicy", "uid-old-cluster-policy"));
        mock.add_daemonset(driver_daemonset("nvidia-vgpu-manager-daemonset", "ClusterPolicy", "uid-cluster-policy"));
        mock.add_daemonset(driver_daemonset("nvidia-gpu-driver-pool-a", "NVIDIADriver", "uid-pool-a"));
        let mut unrelated = daemonset("nvidia-device-plugin-legacy", &["nvidia-device-plugin"]);
        unrelated.metadata.owner_references = driver_daemonset("x", "ClusterPolicy", "uid-cluster-policy")
            .metadata
            .owner_references;
        mock.add_daemonset(unrelated);
        let ctx = test_context(&mock, shipped_catalog(false), None);

        StateEngine::new(&ctx, &crd_policy(), Runtime::Containerd).run().await.unwrap();

        assert_eq!(
            orphaned(&mock),
            vec![
                "nvidia-driver-daemonset".to_string(),
                "nvidia-driver-daemonset-legacy".to_string(),
                "nvidia-vgpu-manager-daemonset".to_string(),
            ]
        );
        assert!(mock.get_daemonset(TEST_NAMESPACE, "nvidia-gpu-driver-pool-a").await.unwrap().is_some());
        assert!(mock.get_daemonset(TEST_NAMESPACE, "nvidia-device-plugin-legacy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vgpu_manager_state_orphans_driver_daemonsets() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let policy = crd_policy();
        let mut engine = StateEngine::new(&ctx, &policy, Runtime::Containerd);

        loop {
            let (name, _) = engine.step().await.unwrap();
            if name == StateName::Driver {
                break;
            }
        }
        mock.add_daemonset(driver_daemonset("nvidia-vgpu-manager-daemonset", "ClusterPolicy", "uid-cluster-policy"));
        assert!(orphaned(&mock).is_empty());

        loop {
            let (name, status) = engine.step().await.unwrap();
            if name == StateName::VgpuManager {
                assert_eq!(status, ControlStatus::Ready);
                break;
            }
        }
        assert_eq!(orphaned(&mock), vec!["nvidia-vgpu-manager-daemonset".to_string()]);
    }

    #[tokio::test]
    async fn test_runtime_class_follows_operator_setting() {
        let mock = MockClusterClient::new();
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let mut spec = ClusterPolicySpec::default();
        spec.operator.runtime_class = Some("nvidia-cdi".into());
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", spec);

        let mut engine = StateEngine::new(&ctx, &policy, Runtime::Containerd);
        engine.step().await.unwrap();

        let key = ObjectKey {
            api_version: "node.k8s.io/v1".into(),
            kind: "RuntimeClass".into(),
            namespace: None,
            name: "nvidia-cdi".into(),
        };
        let rc = mock.object(&key).unwrap();
        assert_eq!(rc.get("handler"), Some(&serde_json::json!("nvidia-cdi")));
    }
}

//! Driver upgrade reconciliation
//!
//! Runs on a fixed period against the active ClusterPolicy and hands the
//! node-by-node work to an [`UpgradeStateManager`].

use crds::ClusterPolicy;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info};

use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::reconciler::{REQUEUE_UPGRADE, active_policy};
use crate::upgrade::coordinator::driver_pod_selector;
use crate::upgrade::stale_labels::{remove_all_upgrade_labels, remove_stale_upgrade_labels};
use crate::upgrade::{UpgradeStateManager, UpgradeSummary};

fn record_summary(ctx: &OperatorContext, summary: &UpgradeSummary) {
    let metrics = &ctx.metrics;
    metrics.upgrades_in_progress.set(summary.in_progress as i64);
    metrics.upgrades_done.set(summary.done as i64);
    metrics.upgrades_failed.set(summary.failed as i64);
    metrics.upgrades_pending.set(summary.pending as i64);
    metrics.upgrades_available.set(summary.available as i64);
}

/// One upgrade pass for `policy`.
pub async fn reconcile_upgrade(
    ctx: &OperatorContext,
    manager: &dyn UpgradeStateManager,
    policy: &ClusterPolicy,
) -> Result<Action, ControllerError> {
    let active = active_policy(ctx.client.list_cluster_policies().await?);
    if active.as_ref().map(ResourceExt::name_any) != Some(policy.name_any()) {
        debug!(policy = %policy.name_any(), "Not the active ClusterPolicy, skipping upgrades");
        return Ok(Action::await_change());
    }

    let driver = &policy.spec.driver;
    let enabled = driver.is_enabled() && driver.auto_upgrade_enabled();
    ctx.metrics.driver_auto_upgrade_enabled.set(i64::from(enabled));
    if !enabled {
        let cleared = remove_all_upgrade_labels(ctx.client.as_ref()).await;
        if cleared > 0 {
            info!(nodes = cleared, "Automatic driver upgrades disabled, removed upgrade labels");
        }
        record_summary(ctx, &UpgradeSummary::default());
        return Ok(Action::requeue(REQUEUE_UPGRADE));
    }

    let upgrade_policy = driver.upgrade_policy.clone().unwrap_or_default();
    let selector = driver_pod_selector(&policy.spec, ctx.is_openshift());
    let state = manager.build_state(ctx.namespace(), selector).await?;
    remove_stale_upgrade_labels(ctx.client.as_ref(), &state).await;

    let summary = manager.apply_state(&state, &upgrade_policy).await?;
    record_summary(ctx, &summary);
    info!(
        nodes = state.total(),
        in_progress = summary.in_progress,
        done = summary.done,
        failed = summary.failed,
        pending = summary.pending,
        "Driver upgrade pass complete"
    );
    Ok(Action::requeue(REQUEUE_UPGRADE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::UPGRADE_STATE;
    use crate::test_utils::*;
    use crate::upgrade::NodeUpgradeStateManager;
    use crate::upgrade::state_manager::POD_TEMPLATE_GENERATION;
    use cluster_client::MockClusterClient;
    use crds::{ClusterPolicySpec, DriverUpgradePolicySpec};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use std::sync::Arc;

    const DRIVER_DS: &str = "nvidia-driver-daemonset";

    fn upgrade_spec(auto_upgrade: bool) -> ClusterPolicySpec {
        let mut spec = ClusterPolicySpec::default();
        spec.driver.upgrade_policy = Some(DriverUpgradePolicySpec {
            auto_upgrade: Some(auto_upgrade),
            ..Default::default()
        });
        spec
    }

    fn cluster_with_driver(generation: &str) -> MockClusterClient {
        let mock = MockClusterClient::new();
        let mut ds = daemonset(DRIVER_DS, &["nvidia-driver-ctr"]);
        ds.metadata.generation = Some(3);
        mock.add_daemonset(ds);
        mock.add_node(gpu_node("gpu-1", "containerd://1.7.0", &[]));
        let mut pod = daemonset_pod(
            TEST_NAMESPACE,
            "nvidia-driver-gpu-1",
            "gpu-1",
            DRIVER_DS,
            &[("app", DRIVER_DS), (POD_TEMPLATE_GENERATION, generation)],
        );
        pod.status = Some(PodStatus {
            phase: Some("Running".into()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        mock.add_pod(pod);
        mock
    }

    #[tokio::test]
    async fn test_up_to_date_node_is_marked_done() {
        let mock = cluster_with_driver("3");
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", upgrade_spec(true));
        mock.add_cluster_policy(policy.clone());
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let manager = NodeUpgradeStateManager::new(ctx.client.clone());

        let action = reconcile_upgrade(&ctx, &manager, &policy).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_UPGRADE));
        assert_eq!(mock.node_labels("gpu-1").get(UPGRADE_STATE).map(String::as_str), Some("upgrade-done"));
        assert_eq!(ctx.metrics.driver_auto_upgrade_enabled.get(), 1);
        assert_eq!(ctx.metrics.upgrades_done.get(), 1);
    }

    #[tokio::test]
    async fn test_disabled_upgrades_clear_labels() {
        let mock = cluster_with_driver("2");
        mock.add_node(gpu_node("gpu-1", "containerd://1.7.0", &[(UPGRADE_STATE, "upgrade-required")]));
        let policy = cluster_policy("cluster-policy", "2024-01-01T00:00:00Z", upgrade_spec(false));
        mock.add_cluster_policy(policy.clone());
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let manager = NodeUpgradeStateManager::new(Arc::new(mock.clone()));

        let action = reconcile_upgrade(&ctx, &manager, &policy).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_UPGRADE));
        assert!(!mock.node_labels("gpu-1").contains_key(UPGRADE_STATE));
        assert_eq!(ctx.metrics.driver_auto_upgrade_enabled.get(), 0);
    }

    #[tokio::test]
    async fn test_inactive_policy_is_skipped() {
        let mock = cluster_with_driver("2");
        let first = cluster_policy("first", "2024-01-01T00:00:00Z", upgrade_spec(false));
        let second = cluster_policy("second", "2024-06-01T00:00:00Z", upgrade_spec(true));
        mock.add_cluster_policy(first);
        mock.add_cluster_policy(second.clone());
        let ctx = test_context(&mock, shipped_catalog(false), None);
        let manager = NodeUpgradeStateManager::new(Arc::new(mock.clone()));

        let action = reconcile_upgrade(&ctx, &manager, &second).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(!mock.node_labels("gpu-1").contains_key(UPGRADE_STATE));
    }
}

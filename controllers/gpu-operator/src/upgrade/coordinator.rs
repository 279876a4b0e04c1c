//! Upgrade policy arithmetic: driver pod selection and upgrade slots

use crds::{ClusterPolicySpec, DrainSpec, DriverUpgradePolicySpec, IntOrPercent};

use crate::error::ControllerError;
use crate::labels::{UPGRADE_DRAIN_SKIP, driver_pods};

/// `maxUnavailable` when the policy leaves it unset
pub const DEFAULT_MAX_UNAVAILABLE: &str = "25%";

/// Selector for the driver pods being upgraded.
///
/// NVIDIADriver-managed pods take precedence over OpenShift driver toolkit
/// pods, which take precedence over classic ClusterPolicy pods.
pub fn driver_pod_selector(spec: &ClusterPolicySpec, openshift: bool) -> &'static str {
    if spec.driver.use_nvidia_driver_crd() {
        driver_pods::CRD_SELECTOR
    } else if openshift && spec.operator.use_openshift_driver_toolkit.unwrap_or(false) {
        driver_pods::OPENSHIFT_DTK_SELECTOR
    } else {
        driver_pods::CLASSIC_SELECTOR
    }
}

/// Drain selector with the operator's own skip label always excluded.
pub fn drain_pod_selector(drain: Option<&DrainSpec>) -> String {
    let skip = format!("{}!=true", UPGRADE_DRAIN_SKIP);
    match drain.and_then(|d| d.pod_selector.as_deref()).filter(|s| !s.is_empty()) {
        Some(selector) => format!("{},{}", selector, skip),
        None => skip,
    }
}

/// Absolute `maxUnavailable` for `total` nodes, percentages rounded up.
pub fn max_unavailable(policy: &DriverUpgradePolicySpec, total: usize) -> Result<usize, ControllerError> {
    let default = IntOrPercent::String(DEFAULT_MAX_UNAVAILABLE.to_string());
    let value = policy.max_unavailable.as_ref().unwrap_or(&default);
    let total = i32::try_from(total).unwrap_or(i32::MAX);
    let scaled = value.scaled_value(total, true)?;
    Ok(usize::try_from(scaled).unwrap_or(0))
}

/// Counts of nodes occupying upgrade capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub total: usize,
    pub in_progress: usize,
    /// Nodes that cannot take workloads: in progress, failed, or cordoned by someone else
    pub unavailable: usize,
}

/// Nodes that may start upgrading now.
pub fn upgrade_slots(policy: &DriverUpgradePolicySpec, occupancy: Occupancy) -> Result<usize, ControllerError> {
    let by_unavailable = max_unavailable(policy, occupancy.total)?.saturating_sub(occupancy.unavailable);
    let by_parallel = match policy.max_parallel_upgrades.unwrap_or(1) {
        p if p <= 0 => usize::MAX,
        p => usize::try_from(p).unwrap_or(usize::MAX).saturating_sub(occupancy.in_progress),
    };
    Ok(by_unavailable.min(by_parallel))
}

//! Reconcilers for ClusterPolicy, NVIDIADriver and driver upgrades

pub mod cluster_policy;
pub mod nvidia_driver;
pub mod upgrade;

#[cfg(test)]
mod nvidia_driver_test;

use std::time::Duration;

use crds::ClusterPolicy;
use kube::ResourceExt;

use crate::error::ControllerError;

/// Operands applied but not ready yet
pub const REQUEUE_NOT_READY: Duration = Duration::from_secs(5);
/// Ready, but no node carries NFD labels
pub const REQUEUE_NO_NFD: Duration = Duration::from_secs(45);
/// Upgrade controller period
pub const REQUEUE_UPGRADE: Duration = Duration::from_secs(120);
/// Configuration errors wait for a spec edit
pub const REQUEUE_INVALID: Duration = Duration::from_secs(60);

/// Condition reasons
pub mod reasons {
    pub const RECONCILED: &str = "Reconciled";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const OPERAND_NOT_READY: &str = "OperandNotReady";
    pub const DRIVER_NOT_READY: &str = "DriverNotReady";
    pub const CONFLICTING_NODE_SELECTOR: &str = "ConflictingNodeSelector";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const NVIDIA_DRIVER_CRD_DISABLED: &str = "NvidiaDriverCRDDisabled";
}

/// The ClusterPolicy in charge: oldest first, then by name.
pub fn active_policy(mut policies: Vec<ClusterPolicy>) -> Option<ClusterPolicy> {
    policies.sort_by(|a, b| {
        a.creation_timestamp()
            .cmp(&b.creation_timestamp())
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
    policies.into_iter().next()
}

/// Retry delay after a failed reconcile.
pub fn error_requeue(error: &ControllerError) -> Duration {
    if error.is_validation() {
        REQUEUE_INVALID
    } else {
        REQUEUE_NOT_READY
    }
}

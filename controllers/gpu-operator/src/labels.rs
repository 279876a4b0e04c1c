//! Node label vocabulary shared by the controllers

/// Node feature discovery label prefix
pub const NFD_LABEL_PREFIX: &str = "feature.node.kubernetes.io/";

/// PCI labels NFD sets for NVIDIA devices (any vendor class, 3D controller, VGA)
pub const GPU_PCI_LABELS: [&str; 3] = [
    "feature.node.kubernetes.io/pci-10de.present",
    "feature.node.kubernetes.io/pci-0302_10de.present",
    "feature.node.kubernetes.io/pci-0300_10de.present",
];

/// Set to `true` on nodes with NVIDIA GPUs, `false` once they disappear
pub const GPU_PRESENT: &str = "nvidia.com/gpu.present";

/// Prefix of the per-operand deploy labels
pub const GPU_DEPLOY_PREFIX: &str = "nvidia.com/gpu.deploy.";

/// `false` disables every operand on the node
pub const DEPLOY_OPERANDS: &str = "nvidia.com/gpu.deploy.operands";

/// MIG manager deploy label, only on MIG-capable container nodes
pub const DEPLOY_MIG_MANAGER: &str = "nvidia.com/gpu.deploy.mig-manager";

/// Per-node workload configuration override
pub const WORKLOAD_CONFIG: &str = "nvidia.com/gpu.workload.config";

pub const MIG_CAPABLE: &str = "nvidia.com/mig.capable";
pub const VGPU_HOST_DRIVER_VERSION: &str = "nvidia.com/vgpu.host-driver-version";
pub const GPU_PRODUCT: &str = "nvidia.com/gpu.product";

/// Prefix of the container runtime labels (`nvidia.com/gpu.runtime.containerd`)
pub const RUNTIME_LABEL_PREFIX: &str = "nvidia.com/gpu.runtime.";

/// NVIDIADriver instance that owns the node's driver
pub const DRIVER_MANAGED_BY: &str = "nvidia.com/gpu.driver.managed-by";

/// Per-node driver upgrade state
pub const UPGRADE_STATE: &str = "nvidia.com/gpu-driver-upgrade-state";

/// Pods carrying this label set to `true` are never drained
pub const UPGRADE_DRAIN_SKIP: &str = "nvidia.com/gpu-driver-upgrade-drain.skip";

/// Value used by boolean labels
pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// Builds `nvidia.com/gpu.deploy.<operand>`.
pub fn deploy_label(operand: &str) -> String {
    format!("{}{}", GPU_DEPLOY_PREFIX, operand)
}

/// Pod labels identifying driver pods, most specific first
pub mod driver_pods {
    /// Pods rendered from an NVIDIADriver instance
    pub const CRD_SELECTOR: &str = "app.kubernetes.io/component=nvidia-driver";
    /// OpenShift driver toolkit pods
    pub const OPENSHIFT_DTK_SELECTOR: &str = "openshift.driver-toolkit=true";
    /// Classic ClusterPolicy driver pods
    pub const CLASSIC_SELECTOR: &str = "app=nvidia-driver-daemonset";
}

/// Object labels set on everything the operator renders
pub mod managed {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const MANAGED_BY_VALUE: &str = "gpu-operator";
    pub const COMPONENT: &str = "app.kubernetes.io/component";
    /// Names the NVIDIADriver instance a driver DaemonSet belongs to
    pub const DRIVER_INSTANCE: &str = "nvidia.com/gpu-driver-instance";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_label() {
        assert_eq!(deploy_label("driver"), "nvidia.com/gpu.deploy.driver");
        assert_eq!(deploy_label("mig-manager"), DEPLOY_MIG_MANAGER);
        assert_eq!(deploy_label("operands"), DEPLOY_OPERANDS);
    }
}

//! Node classification from labels

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::warn;

use crate::labels;

/// What a GPU node is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkloadConfig {
    #[default]
    Container,
    VmPassthrough,
    VmVgpu,
}

impl WorkloadConfig {
    pub const ALL: [WorkloadConfig; 3] = [
        WorkloadConfig::Container,
        WorkloadConfig::VmPassthrough,
        WorkloadConfig::VmVgpu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadConfig::Container => "container",
            WorkloadConfig::VmPassthrough => "vm-passthrough",
            WorkloadConfig::VmVgpu => "vm-vgpu",
        }
    }

    /// Operands deployed for this configuration
    pub fn operands(self) -> &'static [&'static str] {
        match self {
            WorkloadConfig::Container => &[
                "driver",
                "gpu-feature-discovery",
                "container-toolkit",
                "device-plugin",
                "dcgm",
                "dcgm-exporter",
                "node-status-exporter",
                "operator-validator",
            ],
            WorkloadConfig::VmPassthrough => &[
                "sandbox-device-plugin",
                "sandbox-validator",
                "vfio-manager",
                "kata-manager",
                "cc-manager",
            ],
            WorkloadConfig::VmVgpu => &[
                "sandbox-device-plugin",
                "sandbox-validator",
                "vgpu-manager",
                "vgpu-device-manager",
                "kata-manager",
                "cc-manager",
            ],
        }
    }

    /// Deploy labels for this configuration
    pub fn deploy_labels(self) -> Vec<String> {
        self.operands().iter().map(|op| labels::deploy_label(op)).collect()
    }
}

impl FromStr for WorkloadConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadConfig::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("invalid workload config {:?}", s))
    }
}

impl std::fmt::Display for WorkloadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every deploy label across all configurations
pub fn all_deploy_labels() -> Vec<String> {
    let mut all: Vec<String> = WorkloadConfig::ALL
        .into_iter()
        .flat_map(WorkloadConfig::deploy_labels)
        .collect();
    all.sort();
    all.dedup();
    all
}

/// True iff NFD reports an NVIDIA PCI device.
pub fn has_gpu_labels(labels: &BTreeMap<String, String>) -> bool {
    labels::GPU_PCI_LABELS
        .iter()
        .any(|key| labels.get(*key).map(String::as_str) == Some(labels::TRUE))
}

/// True when node feature discovery has labeled the node.
pub fn has_nfd_labels(labels: &BTreeMap<String, String>) -> bool {
    labels.keys().any(|k| k.starts_with(labels::NFD_LABEL_PREFIX))
}

/// True when the node can be partitioned with MIG.
///
/// vGPU hosts never are. Otherwise an explicit `mig.capable=true` or a known
/// MIG-capable product name qualifies.
pub fn is_mig_capable(labels: &BTreeMap<String, String>) -> bool {
    if labels
        .get(labels::VGPU_HOST_DRIVER_VERSION)
        .is_some_and(|v| !v.is_empty())
    {
        return false;
    }
    if labels.get(labels::MIG_CAPABLE).map(String::as_str) == Some(labels::TRUE) {
        return true;
    }
    labels.get(labels::GPU_PRODUCT).is_some_and(|product| {
        let product = product.to_lowercase();
        ["h100", "a100", "a30"].iter().any(|p| product.contains(p))
    })
}

/// Resolves the node's workload configuration.
///
/// Without sandbox workloads every node runs containers. A missing or
/// unparsable node label falls back to the cluster default.
pub fn workload_config(
    node_name: &str,
    labels: &BTreeMap<String, String>,
    sandbox_enabled: bool,
    default: WorkloadConfig,
) -> WorkloadConfig {
    if !sandbox_enabled {
        return WorkloadConfig::Container;
    }
    match labels.get(labels::WORKLOAD_CONFIG) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(node = %node_name, error = %e, default = %default, "Using default workload config");
            default
        }),
    }
}

/// Cluster default workload from `sandboxWorkloads.defaultWorkload`.
pub fn default_workload(configured: Option<&str>) -> WorkloadConfig {
    match configured {
        None | Some("") => WorkloadConfig::Container,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring sandboxWorkloads.defaultWorkload");
            WorkloadConfig::Container
        }),
    }
}

//! ClusterPolicy CRD
//!
//! Singleton, cluster-scoped description of the whole GPU software stack.
//! Only the first ClusterPolicy listed is reconciled; any other instance is
//! reported as `ignored`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::{ComponentImage, ComponentSpec, Condition, ConfigMapRef, EnvVar, IntOrPercent, State, Toleration};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "nvidia.com",
    version = "v1",
    kind = "ClusterPolicy",
    shortname = "cp",
    status = "ClusterPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    /// Operator-wide settings
    #[serde(default)]
    pub operator: OperatorSpec,

    /// Settings applied to every operand DaemonSet
    #[serde(default)]
    pub daemonsets: DaemonsetsSpec,

    /// NVIDIA driver
    #[serde(default)]
    pub driver: DriverSpec,

    /// NVIDIA container toolkit
    #[serde(default)]
    pub toolkit: ToolkitSpec,

    /// Kubernetes device plugin
    #[serde(default)]
    pub device_plugin: DevicePluginSpec,

    /// Standalone DCGM host engine
    #[serde(default)]
    pub dcgm: DcgmSpec,

    /// DCGM metrics exporter
    #[serde(default)]
    pub dcgm_exporter: DcgmExporterSpec,

    /// GPU feature discovery
    #[serde(default)]
    pub gfd: ComponentSpec,

    /// MIG strategy exposed to the device plugin and GFD
    #[serde(default)]
    pub mig: MigSpec,

    /// MIG manager
    #[serde(default)]
    pub mig_manager: MigManagerSpec,

    /// Node status exporter
    #[serde(default)]
    pub node_status_exporter: ComponentSpec,

    /// Operator validator
    #[serde(default)]
    pub validator: ValidatorSpec,

    /// Container Device Interface settings
    #[serde(default)]
    pub cdi: CdiSpec,

    /// Sandbox (VM) workload support
    #[serde(default)]
    pub sandbox_workloads: SandboxWorkloadsSpec,

    /// VFIO manager (vm-passthrough)
    #[serde(default)]
    pub vfio_manager: ComponentSpec,

    /// Sandbox device plugin (KubeVirt)
    #[serde(default)]
    pub sandbox_device_plugin: ComponentSpec,

    /// vGPU host manager (vm-vgpu)
    #[serde(default)]
    pub vgpu_manager: ComponentSpec,

    /// vGPU device manager (vm-vgpu)
    #[serde(default)]
    pub vgpu_device_manager: VgpuDeviceManagerSpec,

    /// Kata runtime class manager
    #[serde(default)]
    pub kata_manager: ComponentSpec,

    /// Confidential computing manager
    #[serde(default)]
    pub cc_manager: ComponentSpec,

    /// Host paths operands rely on
    #[serde(default)]
    pub host_paths: HostPathsSpec,

    /// Fabric manager mode for NVSwitch systems
    #[serde(default)]
    pub fabric_manager: FabricManagerSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyStatus {
    /// Overall state
    #[serde(default)]
    pub state: State,

    /// Namespace the operands are deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Ready / Error conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    /// Runtime assumed when none can be detected (`containerd`, `crio`, `docker`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_runtime: Option<String>,

    /// RuntimeClass name used by operand pods on containerd clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class: Option<String>,

    /// Image for the validation init containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container: Option<ComponentImage>,

    /// Use the OpenShift Driver Toolkit for driver builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_openshift_driver_toolkit: Option<bool>,
}

impl OperatorSpec {
    /// RuntimeClass name, `nvidia` unless overridden.
    pub fn runtime_class_name(&self) -> &str {
        self.runtime_class.as_deref().unwrap_or("nvidia")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DaemonsetsSpec {
    /// Extra labels for every operand pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations for every operand pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Tolerations for every operand pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Priority class for every operand pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// `RollingUpdate` (default) or `OnDelete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<String>,

    /// maxUnavailable for the rolling update strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update_max_unavailable: Option<String>,
}

/// Driver settings shared by the ClusterPolicy driver and NVIDIADriver pools
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriverSettings {
    /// Driver image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// Use precompiled driver images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_precompiled: Option<bool>,

    /// Secret whose keys are exposed as environment through `envFrom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    /// GPUDirect RDMA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdma: Option<RdmaSpec>,

    /// GPUDirect Storage (nvidia-fs sidecar)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gds: Option<ComponentSpec>,

    /// GDRCopy sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gdrcopy: Option<ComponentSpec>,

    /// vGPU guest licensing configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licensing_config: Option<LicensingConfigSpec>,

    /// vGPU virtual topology configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_topology: Option<VirtualTopologySpec>,

    /// ConfigMap with kernel module parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_module_config: Option<ConfigMapRef>,

    /// ConfigMap with custom package repository files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_config: Option<ConfigMapRef>,

    /// ConfigMap with custom CA certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_config: Option<ConfigMapRef>,

    /// k8s-driver-manager init container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<ComponentImage>,
}

impl DriverSettings {
    /// True when GPUDirect Storage is requested.
    pub fn gds_enabled(&self) -> bool {
        self.gds.as_ref().is_some_and(|g| g.enabled_or(false))
    }

    /// True when the GDRCopy sidecar is requested.
    pub fn gdrcopy_enabled(&self) -> bool {
        self.gdrcopy.as_ref().is_some_and(|g| g.enabled_or(false))
    }

    /// True when GPUDirect RDMA is requested.
    pub fn rdma_enabled(&self) -> bool {
        self.rdma.as_ref().is_some_and(|r| r.enabled.unwrap_or(false))
    }

    /// True when precompiled images are requested.
    pub fn precompiled(&self) -> bool {
        self.use_precompiled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    /// Deploy the driver (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Hand driver management over to NVIDIADriver resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_nvidia_driver_crd: Option<bool>,

    /// Shared driver settings
    #[serde(flatten)]
    pub settings: DriverSettings,

    /// Rolling driver upgrade policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_policy: Option<DriverUpgradePolicySpec>,
}

impl DriverSpec {
    /// Driver is deployed unless explicitly disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// NVIDIADriver resources own the driver DaemonSets.
    pub fn use_nvidia_driver_crd(&self) -> bool {
        self.use_nvidia_driver_crd.unwrap_or(false)
    }

    /// Automatic node-by-node upgrades are on.
    pub fn auto_upgrade_enabled(&self) -> bool {
        self.upgrade_policy
            .as_ref()
            .is_some_and(|p| p.auto_upgrade.unwrap_or(false))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RdmaSpec {
    /// Load nvidia-peermem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// MOFED is installed on the host instead of by the network operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_host_mofed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LicensingConfigSpec {
    /// ConfigMap holding `gridd.conf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Secret holding `gridd.conf` and the client token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// NVIDIA License System is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nls_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualTopologySpec {
    /// ConfigMap holding `virtual-topology.conf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriverUpgradePolicySpec {
    /// Upgrade nodes automatically when the driver DaemonSet changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_upgrade: Option<bool>,

    /// Nodes upgraded at once; 0 means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_upgrades: Option<i32>,

    /// Nodes that may be unavailable at once (default `25%`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrPercent>,

    /// Wait for matching jobs to finish before draining
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_completion: Option<WaitForCompletionSpec>,

    /// Deletion of pods using GPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_deletion: Option<PodDeletionSpec>,

    /// Node drain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WaitForCompletionSpec {
    /// Label selector for the pods to wait for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<String>,

    /// Give up waiting after this many seconds (0 = forever)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodDeletionSpec {
    /// Delete pods not managed by a controller too
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    /// Delete pods with emptyDir volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_empty_dir: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DrainSpec {
    /// Drain the node before the driver restarts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    /// Evict pods not managed by a controller too
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,

    /// Only drain pods matching this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<String>,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    /// Evict pods with emptyDir volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_empty_dir: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolkitSpec {
    /// Deploy the toolkit (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// Host directory the toolkit is installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DevicePluginSpec {
    /// Deploy the device plugin (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// Plugin configuration ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMapRef>,

    /// Host directory for the MPS control daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mps_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DcgmSpec {
    /// Deploy a standalone host engine (default false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// Host engine port (default 5555)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DcgmExporterSpec {
    /// Deploy the exporter (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// ConfigMap with the metrics CSV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMapRef>,

    /// ServiceMonitor creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor: Option<ServiceMonitorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Create a ServiceMonitor for the exporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Scrape interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// MIG strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MigStrategy {
    /// All GPUs on a node share one MIG geometry
    #[default]
    Single,
    /// Mixed MIG geometries per node
    Mixed,
}

impl MigStrategy {
    /// Value of the `MIG_STRATEGY` env var.
    pub fn as_str(self) -> &'static str {
        match self {
            MigStrategy::Single => "single",
            MigStrategy::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigSpec {
    /// MIG strategy
    #[serde(default)]
    pub strategy: MigStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigManagerSpec {
    /// Deploy the MIG manager (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// MIG partitioning ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMapRef>,

    /// GPU clients ConfigMap (services restarted around reconfiguration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_clients_config: Option<ConfigMapRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSpec {
    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// Env for the device plugin validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_env: Vec<EnvVar>,

    /// Env for the driver validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub driver_env: Vec<EnvVar>,

    /// Env for the toolkit validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolkit_env: Vec<EnvVar>,

    /// Env for the CUDA workload validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cuda_env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CdiSpec {
    /// Generate CDI specs and inject devices through CDI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Make CDI the default runtime mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,

    /// Inject devices through the NRI plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nri_plugin_enabled: Option<bool>,
}

impl CdiSpec {
    /// CDI is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    /// CDI is the default runtime mode.
    pub fn is_default(&self) -> bool {
        self.default.unwrap_or(false)
    }

    /// The NRI plugin is on.
    pub fn is_nri_plugin_enabled(&self) -> bool {
        self.nri_plugin_enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SandboxWorkloadsSpec {
    /// Allow nodes to run VM workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Workload used for nodes without a workload label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workload: Option<String>,
}

impl SandboxWorkloadsSpec {
    /// Sandbox workloads are on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VgpuDeviceManagerSpec {
    /// Deploy the vGPU device manager (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,

    /// vGPU device configuration ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMapRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostPathsSpec {
    /// Host root filesystem (default `/`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_fs: Option<String>,

    /// Where the containerized driver is installed (default `/run/nvidia/driver`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_install_dir: Option<String>,
}

/// Fabric manager operating mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FabricManagerMode {
    /// NVSwitches and GPUs are passed through to the VM together
    FullPassthrough,
    /// NVSwitches stay on the host; the host driver runs fabric manager
    SharedNvswitch,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FabricManagerSpec {
    /// Fabric manager mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FabricManagerMode>,
}

impl ClusterPolicySpec {
    /// Container toolkit enablement (default true).
    pub fn toolkit_enabled(&self) -> bool {
        self.toolkit.enabled.unwrap_or(true)
    }

    /// Device plugin enablement (default true).
    pub fn device_plugin_enabled(&self) -> bool {
        self.device_plugin.enabled.unwrap_or(true)
    }

    /// Standalone DCGM enablement (default false).
    pub fn dcgm_enabled(&self) -> bool {
        self.dcgm.enabled.unwrap_or(false)
    }

    /// DCGM exporter enablement (default true).
    pub fn dcgm_exporter_enabled(&self) -> bool {
        self.dcgm_exporter.enabled.unwrap_or(true)
    }

    /// GFD enablement (default true).
    pub fn gfd_enabled(&self) -> bool {
        self.gfd.enabled_or(true)
    }

    /// MIG manager enablement (default true).
    pub fn mig_manager_enabled(&self) -> bool {
        self.mig_manager.enabled.unwrap_or(true)
    }

    /// Node status exporter enablement (default false).
    pub fn node_status_exporter_enabled(&self) -> bool {
        self.node_status_exporter.enabled_or(false)
    }

    /// VFIO manager enablement (default true, sandbox only).
    pub fn vfio_manager_enabled(&self) -> bool {
        self.vfio_manager.enabled_or(true)
    }

    /// Sandbox device plugin enablement (default true, sandbox only).
    pub fn sandbox_device_plugin_enabled(&self) -> bool {
        self.sandbox_device_plugin.enabled_or(true)
    }

    /// vGPU manager enablement (default false, sandbox only).
    pub fn vgpu_manager_enabled(&self) -> bool {
        self.vgpu_manager.enabled_or(false)
    }

    /// vGPU device manager enablement (default true, sandbox only).
    pub fn vgpu_device_manager_enabled(&self) -> bool {
        self.vgpu_device_manager.enabled.unwrap_or(true)
    }

    /// Kata manager enablement (default false, sandbox only).
    pub fn kata_manager_enabled(&self) -> bool {
        self.kata_manager.enabled_or(false)
    }

    /// CC manager enablement (default false, sandbox only).
    pub fn cc_manager_enabled(&self) -> bool {
        self.cc_manager.enabled_or(false)
    }

    /// Service monitor for DCGM exporter requested.
    pub fn dcgm_exporter_service_monitor_enabled(&self) -> bool {
        self.dcgm_exporter
            .service_monitor
            .as_ref()
            .is_some_and(|s| s.enabled.unwrap_or(false))
    }
}

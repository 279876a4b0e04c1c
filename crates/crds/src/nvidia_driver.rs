//! NVIDIADriver CRD
//!
//! Node-pool scoped driver deployment. Each instance selects its nodes with a
//! `nodeSelector`; an instance with an empty selector is the default pool and
//! only claims nodes no other instance selects.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cluster_policy::DriverSettings;
use crate::common::{Condition, State, Toleration};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "nvidia.com",
    version = "v1alpha1",
    kind = "NVIDIADriver",
    shortname = "nvd",
    status = "NVIDIADriverStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NVIDIADriverSpec {
    /// Kind of driver deployed to the pool
    #[serde(default)]
    pub driver_type: DriverType,

    /// Nodes this instance deploys to (empty = default pool)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Driver settings
    #[serde(flatten)]
    pub settings: DriverSettings,

    /// Extra labels for the driver pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations for the driver pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Tolerations for the driver pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Priority class for the driver pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// Driver flavour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DriverType {
    /// Datacenter GPU driver
    #[default]
    Gpu,
    /// vGPU guest driver (licensed)
    Vgpu,
    /// vGPU host manager
    VgpuHostManager,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NVIDIADriverStatus {
    /// Overall state
    #[serde(default)]
    pub state: State,

    /// Namespace the driver DaemonSet lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Ready / Error conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl NVIDIADriverSpec {
    /// The instance claims whatever no other instance selects.
    pub fn is_default_pool(&self) -> bool {
        self.node_selector.is_empty()
    }
}

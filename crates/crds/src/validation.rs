//! Configuration validation
//!
//! Validation failures require a user edit to clear. Controllers surface
//! them as status conditions rather than retrying faster than their normal
//! interval.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::cluster_policy::{ClusterPolicySpec, DriverSettings, FabricManagerMode};
use crate::common::selector_matches;
use crate::nvidia_driver::NVIDIADriver;

/// Workload value selecting VM passthrough
pub const WORKLOAD_VM_PASSTHROUGH: &str = "vm-passthrough";

/// Errors found while validating a custom resource
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// NRI plugin requested while CDI is off
    #[error("cdi.nriPluginEnabled=true conflicts with cdi.enabled=false: the NRI plugin requires CDI to be enabled")]
    NriWithoutCdi,

    /// vm-passthrough with shared NVSwitch needs the host driver for fabric manager
    #[error("driver.enabled=false conflicts with fabricManager.mode=shared-nvswitch on vm-passthrough workloads: the driver must be enabled to run fabric manager")]
    SharedNvswitchRequiresDriver,

    /// Precompiled images do not ship GPUDirect Storage
    #[error("driver.usePrecompiled=true conflicts with gds.enabled=true: precompiled drivers do not support GPUDirect Storage")]
    PrecompiledWithGds,

    /// Sandbox workloads cannot be combined with automatic driver upgrades
    #[error("sandboxWorkloads.enabled=true conflicts with driver.upgradePolicy.autoUpgrade=true")]
    SandboxWithAutoUpgrade,

    /// Licensing config taken from two sources
    #[error("licensingConfig.secretName and licensingConfig.configMapName are mutually exclusive")]
    LicensingSourceConflict,

    /// Malformed int-or-percent value
    #[error("invalid int-or-percent value {0:?}")]
    InvalidIntOrPercent(String),

    /// Two NVIDIADriver instances claim the same node
    #[error("conflicting node selectors: node {node} is selected by NVIDIADriver instances {instances:?}")]
    ConflictingNodeSelector {
        /// Node claimed more than once
        node: String,
        /// Instances claiming it
        instances: Vec<String>,
    },
}

impl ClusterPolicySpec {
    /// Validates cross-field constraints.
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.cdi.is_enabled() && self.cdi.is_nri_plugin_enabled() {
            return Err(ValidationError::NriWithoutCdi);
        }

        let passthrough = self.sandbox_workloads.default_workload.as_deref() == Some(WORKLOAD_VM_PASSTHROUGH);
        if passthrough
            && self.fabric_manager.mode == Some(FabricManagerMode::SharedNvswitch)
            && !self.driver.is_enabled()
        {
            return Err(ValidationError::SharedNvswitchRequiresDriver);
        }

        if self.sandbox_workloads.is_enabled() && self.driver.auto_upgrade_enabled() {
            return Err(ValidationError::SandboxWithAutoUpgrade);
        }

        if let Some(max) = self
            .driver
            .upgrade_policy
            .as_ref()
            .and_then(|p| p.max_unavailable.as_ref())
        {
            max.scaled_value(100, true)?;
        }

        self.driver.settings.validate()
    }
}

impl DriverSettings {
    /// Validates driver-level constraints shared by both CRDs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.precompiled() && self.gds_enabled() {
            return Err(ValidationError::PrecompiledWithGds);
        }
        if let Some(lic) = &self.licensing_config {
            let from_secret = lic.secret_name.as_deref().is_some_and(|s| !s.is_empty());
            let from_config_map = lic.config_map_name.as_deref().is_some_and(|s| !s.is_empty());
            if from_secret && from_config_map {
                return Err(ValidationError::LicensingSourceConflict);
            }
        }
        Ok(())
    }
}

/// Resolves which NVIDIADriver instance owns each node.
///
/// Non-empty selectors must not overlap on any node. A single empty-selector
/// instance is the default pool: it owns the nodes no other instance selects.
/// Returns node name → owning instance name.
pub fn resolve_driver_owners(
    drivers: &[NVIDIADriver],
    nodes: &[Node],
) -> Result<BTreeMap<String, String>, ValidationError> {
    let mut owners = BTreeMap::new();

    for node in nodes {
        let node_name = node.name_any();
        let labels = node.labels();

        let selecting: Vec<String> = drivers
            .iter()
            .filter(|d| !d.spec.is_default_pool() && selector_matches(&d.spec.node_selector, labels))
            .map(ResourceExt::name_any)
            .collect();

        let defaults: Vec<String> = drivers
            .iter()
            .filter(|d| d.spec.is_default_pool())
            .map(ResourceExt::name_any)
            .collect();

        let owner = match (selecting.len(), defaults.len()) {
            (1, _) => selecting[0].clone(),
            (0, 0) => continue,
            (0, 1) => defaults[0].clone(),
            (0, _) => {
                return Err(ValidationError::ConflictingNodeSelector {
                    node: node_name,
                    instances: defaults,
                });
            }
            _ => {
                return Err(ValidationError::ConflictingNodeSelector {
                    node: node_name,
                    instances: selecting,
                });
            }
        };
        owners.insert(node_name, owner);
    }

    Ok(owners)
}

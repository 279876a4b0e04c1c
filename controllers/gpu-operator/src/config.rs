//! Process configuration from environment variables

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ControllerError;

pub const DEFAULT_ASSETS_DIR: &str = "/opt/gpu-operator";
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Environment variables holding fallback images for operands whose
/// repository/image/version triplet is left empty in the custom resource.
pub const IMAGE_ENV_VARS: [&str; 19] = [
    "DRIVER_IMAGE",
    "DRIVER_MANAGER_IMAGE",
    "CONTAINER_TOOLKIT_IMAGE",
    "DEVICE_PLUGIN_IMAGE",
    "DCGM_IMAGE",
    "DCGM_EXPORTER_IMAGE",
    "GFD_IMAGE",
    "VALIDATOR_IMAGE",
    "MIG_MANAGER_IMAGE",
    "NODE_STATUS_EXPORTER_IMAGE",
    "GDS_IMAGE",
    "GDRCOPY_IMAGE",
    "VFIO_MANAGER_IMAGE",
    "SANDBOX_DEVICE_PLUGIN_IMAGE",
    "VGPU_MANAGER_IMAGE",
    "VGPU_DEVICE_MANAGER_IMAGE",
    "KATA_MANAGER_IMAGE",
    "CC_MANAGER_IMAGE",
    "MPS_CONTROL_DAEMON_IMAGE",
];

/// Operator configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace operands are deployed into
    pub namespace: String,
    /// Root of the manifest catalog
    pub assets_dir: PathBuf,
    /// Address of the metrics/probe server
    pub metrics_bind_address: SocketAddr,
    /// Name of the operator's own pod, if known
    pub pod_name: Option<String>,
    image_fallbacks: BTreeMap<String, String>,
}

impl OperatorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("OPERATOR_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("OPERATOR_NAMESPACE environment variable is required".to_string())
            })?;

        let assets_dir = PathBuf::from(lookup("ASSETS_DIR").unwrap_or_else(|| DEFAULT_ASSETS_DIR.to_string()));

        let bind = lookup("METRICS_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());
        let metrics_bind_address = bind.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_BIND_ADDRESS {:?} is not a socket address: {}", bind, e))
        })?;

        let image_fallbacks = IMAGE_ENV_VARS
            .iter()
            .filter_map(|key| {
                lookup(key)
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v))
            })
            .collect();

        Ok(Self {
            namespace,
            assets_dir,
            metrics_bind_address,
            pod_name: lookup("OPERATOR_POD_NAME").filter(|n| !n.is_empty()),
            image_fallbacks,
        })
    }

    /// Fallback image from the named environment variable.
    pub fn image_fallback(&self, env_var: &str) -> Option<&str> {
        self.image_fallbacks.get(env_var).map(String::as_str)
    }

    /// Configuration for tests.
    #[cfg(test)]
    pub fn for_tests(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            metrics_bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            pod_name: None,
            image_fallbacks: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_image_fallback(mut self, env_var: &str, image: &str) -> Self {
        self.image_fallbacks.insert(env_var.to_string(), image.to_string());
        self
    }
}

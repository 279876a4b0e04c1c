//! Container runtime detection
//!
//! Nodes report `status.nodeInfo.containerRuntimeVersion` as
//! `<runtime>://<version>`. The cluster-wide runtime drives how the toolkit
//! and runtime class are rendered.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::error::ControllerError;
use crate::labels::RUNTIME_LABEL_PREFIX;

/// Container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Runtime {
    #[default]
    Containerd,
    Crio,
    Docker,
}

impl Runtime {
    pub const ALL: [Runtime; 3] = [Runtime::Containerd, Runtime::Crio, Runtime::Docker];

    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Containerd => "containerd",
            Runtime::Crio => "crio",
            Runtime::Docker => "docker",
        }
    }

    /// Node label advertising this runtime
    pub fn label(self) -> String {
        format!("{}{}", RUNTIME_LABEL_PREFIX, self.as_str())
    }

    /// Parses `operator.defaultRuntime`.
    pub fn from_name(name: &str) -> Option<Runtime> {
        match name.trim().to_ascii_lowercase().as_str() {
            "containerd" => Some(Runtime::Containerd),
            "crio" | "cri-o" => Some(Runtime::Crio),
            "docker" => Some(Runtime::Docker),
            _ => None,
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a `containerRuntimeVersion` string.
pub fn parse_runtime(version: &str) -> Result<Runtime, ControllerError> {
    if version.starts_with("docker") {
        Ok(Runtime::Docker)
    } else if version.starts_with("containerd") {
        Ok(Runtime::Containerd)
    } else if version.starts_with("cri-o") {
        Ok(Runtime::Crio)
    } else {
        Err(ControllerError::UnrecognizedRuntime(version.to_string()))
    }
}

/// Runtime reported by a node.
pub fn node_runtime(node: &Node) -> Result<Runtime, ControllerError> {
    let version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.container_runtime_version.as_str())
        .unwrap_or_default();
    parse_runtime(version)
}

/// Cluster runtime, tolerating mixed clusters.
///
/// OpenShift always runs CRI-O. Otherwise containerd wins as soon as one node
/// reports it, then the first runtime parsed, then containerd by default.
pub fn cluster_runtime(nodes: &[Node], openshift: bool) -> Runtime {
    if openshift {
        return Runtime::Crio;
    }

    let mut first = None;
    for node in nodes {
        match node_runtime(node) {
            Ok(Runtime::Containerd) => return Runtime::Containerd,
            Ok(runtime) => {
                first.get_or_insert(runtime);
            }
            Err(e) => warn!(node = %node.name_any(), error = %e, "Skipping node for runtime detection"),
        }
    }

    let runtime = first.unwrap_or_default();
    debug!(runtime = %runtime, "Detected cluster container runtime");
    runtime
}

/// Cluster runtime, rejecting nodes that disagree.
pub fn cluster_runtime_strict(nodes: &[Node], openshift: bool) -> Result<Runtime, ControllerError> {
    if openshift {
        return Ok(Runtime::Crio);
    }

    let mut found: Option<Runtime> = None;
    for node in nodes {
        let runtime = match node_runtime(node) {
            Ok(r) => r,
            Err(e) => {
                warn!(node = %node.name_any(), error = %e, "Skipping node for runtime detection");
                continue;
            }
        };
        match found {
            Some(existing) if existing != runtime => {
                return Err(ControllerError::MixedRuntimes(existing.to_string(), runtime.to_string()));
            }
            _ => found = Some(runtime),
        }
    }

    Ok(found.unwrap_or_default())
}

//! Manifest catalog loaded once at startup
//!
//! Each state directory under the assets root is walked recursively in
//! lexicographic order. Every YAML document is decoded through the kind
//! registry; unknown kinds are skipped with a warning and decode failures
//! abort startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::manifests::resources::{Kind, Resources};

/// Operand states in deployment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateName {
    PreRequisites,
    OperatorMetrics,
    Driver,
    ContainerToolkit,
    OperatorValidation,
    DevicePlugin,
    MpsControlDaemon,
    Dcgm,
    DcgmExporter,
    GpuFeatureDiscovery,
    MigManager,
    NodeStatusExporter,
    VgpuManager,
    VgpuDeviceManager,
    SandboxValidation,
    VfioManager,
    SandboxDevicePlugin,
    KataManager,
    CcManager,
}

impl StateName {
    pub const ALL: [StateName; 19] = [
        StateName::PreRequisites,
        StateName::OperatorMetrics,
        StateName::Driver,
        StateName::ContainerToolkit,
        StateName::OperatorValidation,
        StateName::DevicePlugin,
        StateName::MpsControlDaemon,
        StateName::Dcgm,
        StateName::DcgmExporter,
        StateName::GpuFeatureDiscovery,
        StateName::MigManager,
        StateName::NodeStatusExporter,
        StateName::VgpuManager,
        StateName::VgpuDeviceManager,
        StateName::SandboxValidation,
        StateName::VfioManager,
        StateName::SandboxDevicePlugin,
        StateName::KataManager,
        StateName::CcManager,
    ];

    /// Directory under the assets root
    pub fn dir(self) -> &'static str {
        match self {
            StateName::PreRequisites => "pre-requisites",
            StateName::OperatorMetrics => "state-operator-metrics",
            StateName::Driver => "state-driver",
            StateName::ContainerToolkit => "state-container-toolkit",
            StateName::OperatorValidation => "state-operator-validation",
            StateName::DevicePlugin => "state-device-plugin",
            StateName::MpsControlDaemon => "state-mps-control-daemon",
            StateName::Dcgm => "state-dcgm",
            StateName::DcgmExporter => "state-dcgm-exporter",
            StateName::GpuFeatureDiscovery => "gpu-feature-discovery",
            StateName::MigManager => "state-mig-manager",
            StateName::NodeStatusExporter => "state-node-status-exporter",
            StateName::VgpuManager => "state-vgpu-manager",
            StateName::VgpuDeviceManager => "state-vgpu-device-manager",
            StateName::SandboxValidation => "state-sandbox-validation",
            StateName::VfioManager => "state-vfio-manager",
            StateName::SandboxDevicePlugin => "state-sandbox-device-plugin",
            StateName::KataManager => "state-kata-manager",
            StateName::CcManager => "state-cc-manager",
        }
    }

    /// States that only run for VM workloads
    pub fn is_sandbox(self) -> bool {
        matches!(
            self,
            StateName::VgpuManager
                | StateName::VgpuDeviceManager
                | StateName::SandboxValidation
                | StateName::VfioManager
                | StateName::SandboxDevicePlugin
                | StateName::KataManager
                | StateName::CcManager
        )
    }
}

impl std::fmt::Display for StateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

/// Decoded objects of one state and the controls that apply them
#[derive(Debug, Clone)]
pub struct StateAssets {
    pub name: StateName,
    pub resources: Resources,
    /// One entry per decoded kind, in first-seen order
    pub controls: Vec<Kind>,
}

impl StateAssets {
    fn new(name: StateName) -> Self {
        Self {
            name,
            resources: Resources::default(),
            controls: Vec::new(),
        }
    }

    /// Decodes every document of one manifest file.
    pub fn add_manifest(&mut self, text: &str, origin: &str) -> Result<(), ControllerError> {
        for doc in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(doc).map_err(|e| ControllerError::asset(origin, e))?;
            if value.is_null() {
                continue;
            }
            let Some(kind_name) = value.get("kind").and_then(Value::as_str) else {
                return Err(ControllerError::asset(origin, "document without a kind"));
            };
            let Some(kind) = Kind::from_kind(kind_name) else {
                warn!(file = %origin, kind = %kind_name, "Ignoring manifest of unsupported kind");
                continue;
            };
            self.resources.insert(kind, value, origin)?;
            if !self.controls.contains(&kind) {
                self.controls.push(kind);
            }
        }
        Ok(())
    }
}

/// All states, in deployment order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub states: Vec<StateAssets>,
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

fn has_openshift_segment(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str() == "openshift")
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ControllerError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| ControllerError::asset(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| ControllerError::asset(dir, e))?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if is_manifest(&path) {
            out.push(path);
        }
    }
    Ok(())
}

impl Catalog {
    /// Loads every state directory under `root`.
    pub fn load(root: &Path, openshift: bool) -> Result<Self, ControllerError> {
        let mut states = Vec::with_capacity(StateName::ALL.len());
        for name in StateName::ALL {
            states.push(Self::load_state(root, name, openshift)?);
        }
        info!(root = %root.display(), states = states.len(), "Loaded manifest catalog");
        Ok(Self { states })
    }

    fn load_state(root: &Path, name: StateName, openshift: bool) -> Result<StateAssets, ControllerError> {
        let dir = root.join(name.dir());
        if !dir.is_dir() {
            return Err(ControllerError::asset(&dir, "state directory not found"));
        }

        let mut files = Vec::new();
        collect_files(&dir, &mut files)?;

        let mut state = StateAssets::new(name);
        for file in files {
            if !openshift && has_openshift_segment(&file, &dir) {
                debug!(file = %file.display(), "Skipping OpenShift-only manifest");
                continue;
            }
            let text = std::fs::read_to_string(&file).map_err(|e| ControllerError::asset(&file, e))?;
            state.add_manifest(&text, &file.display().to_string())?;
        }
        debug!(state = %name, controls = ?state.controls, "Loaded state");
        Ok(state)
    }

    pub fn state(&self, name: StateName) -> Option<&StateAssets> {
        self.states.iter().find(|s| s.name == name)
    }
}

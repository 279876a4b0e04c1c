//! Which states a ClusterPolicy turns on

use crds::ClusterPolicySpec;

use crate::manifests::{Kind, StateName};

/// True when the state's objects should exist.
///
/// Sandbox states additionally require sandbox workloads to be enabled.
pub fn state_enabled(name: StateName, spec: &ClusterPolicySpec) -> bool {
    if name.is_sandbox() && !spec.sandbox_workloads.is_enabled() {
        return false;
    }
    match name {
        StateName::PreRequisites | StateName::OperatorMetrics | StateName::OperatorValidation => true,
        StateName::Driver => spec.driver.is_enabled(),
        StateName::ContainerToolkit => spec.toolkit_enabled(),
        StateName::DevicePlugin | StateName::MpsControlDaemon => spec.device_plugin_enabled(),
        StateName::Dcgm => spec.dcgm_enabled(),
        StateName::DcgmExporter => spec.dcgm_exporter_enabled(),
        StateName::GpuFeatureDiscovery => spec.gfd_enabled(),
        StateName::MigManager => spec.mig_manager_enabled(),
        StateName::NodeStatusExporter => spec.node_status_exporter_enabled(),
        StateName::VgpuManager => spec.vgpu_manager_enabled(),
        StateName::VgpuDeviceManager => spec.vgpu_device_manager_enabled(),
        StateName::SandboxValidation => true,
        StateName::VfioManager => spec.vfio_manager_enabled(),
        StateName::SandboxDevicePlugin => spec.sandbox_device_plugin_enabled(),
        StateName::KataManager => spec.kata_manager_enabled(),
        StateName::CcManager => spec.cc_manager_enabled(),
    }
}

/// Per-kind gate inside an enabled state.
pub fn control_enabled(name: StateName, kind: Kind, spec: &ClusterPolicySpec) -> bool {
    match (name, kind) {
        (StateName::DcgmExporter, Kind::ServiceMonitor) => spec.dcgm_exporter_service_monitor_enabled(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::ServiceMonitorSpec;

    #[test]
    fn test_defaults() {
        let spec = ClusterPolicySpec::default();
        let enabled: Vec<StateName> = StateName::ALL
            .into_iter()
            .filter(|s| state_enabled(*s, &spec))
            .collect();
        assert_eq!(
            enabled,
            vec![
                StateName::PreRequisites,
                StateName::OperatorMetrics,
                StateName::Driver,
                StateName::ContainerToolkit,
                StateName::OperatorValidation,
                StateName::DevicePlugin,
                StateName::MpsControlDaemon,
                StateName::DcgmExporter,
                StateName::GpuFeatureDiscovery,
                StateName::MigManager,
            ]
        );
    }

    #[test]
    fn test_sandbox_states_need_sandbox_workloads() {
        let mut spec = ClusterPolicySpec::default();
        assert!(!state_enabled(StateName::VfioManager, &spec));
        assert!(!state_enabled(StateName::SandboxValidation, &spec));

        spec.sandbox_workloads.enabled = Some(true);
        assert!(state_enabled(StateName::VfioManager, &spec));
        assert!(state_enabled(StateName::SandboxValidation, &spec));
        assert!(!state_enabled(StateName::VgpuManager, &spec));

        spec.vgpu_manager.enabled = Some(true);
        assert!(state_enabled(StateName::VgpuManager, &spec));
    }

    #[test]
    fn test_service_monitor_gate() {
        let mut spec = ClusterPolicySpec::default();
        assert!(!control_enabled(StateName::DcgmExporter, Kind::ServiceMonitor, &spec));
        assert!(control_enabled(StateName::DcgmExporter, Kind::DaemonSet, &spec));
        spec.dcgm_exporter.service_monitor = Some(ServiceMonitorSpec {
            enabled: Some(true),
            interval: None,
        });
        assert!(control_enabled(StateName::DcgmExporter, Kind::ServiceMonitor, &spec));
    }
}

//! Per-component DaemonSet transforms
//!
//! Each transform takes a freshly decoded template and the relevant slice of
//! the ClusterPolicy spec, and mutates the template in place. Transforms are
//! idempotent.

pub mod cdi;
pub mod common;
pub mod dcgm;
pub mod device_plugin;
pub mod driver;
pub mod mig_manager;
pub mod runtime;
pub mod sandbox;
pub mod toolkit;
pub mod validator;

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::manifests::StateName;
use crate::node::runtime::Runtime;

/// Cluster facts the transforms depend on
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub config: &'a OperatorConfig,
    pub runtime: Runtime,
    pub openshift: bool,
}

/// Operand pods that run GPU containers through the NVIDIA runtime class
fn uses_runtime_class(state: StateName) -> bool {
    matches!(
        state,
        StateName::OperatorValidation
            | StateName::DevicePlugin
            | StateName::MpsControlDaemon
            | StateName::Dcgm
            | StateName::DcgmExporter
            | StateName::GpuFeatureDiscovery
            | StateName::MigManager
            | StateName::NodeStatusExporter
    )
}

/// Renders the DaemonSet of `state` for the given ClusterPolicy.
pub fn transform_state_daemonset(
    state: StateName,
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    common::apply_daemonsets_config(ds, &spec.daemonsets)?;

    match state {
        StateName::PreRequisites | StateName::OperatorMetrics => {}
        StateName::Driver => driver::transform_driver(ds, &spec.driver.settings, &spec.host_paths, ctx.config)?,
        StateName::ContainerToolkit => toolkit::transform_toolkit(ds, spec, ctx)?,
        StateName::OperatorValidation => validator::transform_validator(ds, spec, ctx)?,
        StateName::DevicePlugin => device_plugin::transform_device_plugin(ds, spec, ctx)?,
        StateName::MpsControlDaemon => device_plugin::transform_mps_control_daemon(ds, spec, ctx)?,
        StateName::Dcgm => dcgm::transform_dcgm(ds, spec, ctx)?,
        StateName::DcgmExporter => dcgm::transform_dcgm_exporter(ds, spec, ctx)?,
        StateName::GpuFeatureDiscovery => device_plugin::transform_gfd(ds, spec, ctx)?,
        StateName::MigManager => mig_manager::transform_mig_manager(ds, spec, ctx)?,
        StateName::NodeStatusExporter => dcgm::transform_node_status_exporter(ds, spec, ctx)?,
        StateName::VgpuManager => sandbox::transform_vgpu_manager(ds, spec, ctx)?,
        StateName::VgpuDeviceManager => sandbox::transform_vgpu_device_manager(ds, spec, ctx)?,
        StateName::SandboxValidation => sandbox::transform_sandbox_validator(ds, spec, ctx)?,
        StateName::VfioManager => sandbox::transform_vfio_manager(ds, spec, ctx)?,
        StateName::SandboxDevicePlugin => sandbox::transform_sandbox_device_plugin(ds, spec, ctx)?,
        StateName::KataManager => sandbox::transform_kata_manager(ds, spec, ctx)?,
        StateName::CcManager => sandbox::transform_cc_manager(ds, spec, ctx)?,
    }

    let pod = common::pod_spec_mut(ds)?;
    if uses_runtime_class(state) && ctx.runtime == Runtime::Containerd && !ctx.openshift {
        pod.runtime_class_name = Some(spec.operator.runtime_class_name().to_string());
    }
    if common::has_placeholder_images(pod) {
        common::fill_placeholder_images(pod, &validator::validator_image(spec, ctx)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daemonset, test_config};
    use k8s_openapi::api::core::v1::Container;

    #[test]
    fn test_runtime_class_only_on_containerd_outside_openshift() {
        let config = test_config();
        let spec = ClusterPolicySpec::default();
        for (runtime, openshift, expected) in [
            (Runtime::Containerd, false, Some("nvidia")),
            (Runtime::Containerd, true, None),
            (Runtime::Crio, false, None),
        ] {
            let ctx = TransformContext {
                config: &config,
                runtime,
                openshift,
            };
            let mut ds = daemonset("nvidia-device-plugin-daemonset", &["nvidia-device-plugin"]);
            transform_state_daemonset(StateName::DevicePlugin, &mut ds, &spec, &ctx).unwrap();
            let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
            assert_eq!(pod.runtime_class_name.as_deref(), expected, "{runtime} openshift={openshift}");
        }

        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut ds = daemonset("nvidia-container-toolkit-daemonset", &["nvidia-container-toolkit-ctr"]);
        transform_state_daemonset(StateName::ContainerToolkit, &mut ds, &spec, &ctx).unwrap();
        assert!(ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().runtime_class_name.is_none());
    }

    #[test]
    fn test_validation_init_containers_get_validator_image() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Crio,
            openshift: false,
        };
        let mut ds = daemonset("nvidia-dcgm-exporter", &["nvidia-dcgm-exporter"]);
        ds.spec.as_mut().unwrap().template.spec.as_mut().unwrap().init_containers = Some(vec![Container {
            name: "toolkit-validation".into(),
            image: Some(common::IMAGE_PLACEHOLDER.into()),
            ..Default::default()
        }]);
        transform_state_daemonset(StateName::DcgmExporter, &mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(
            pod.init_containers.as_ref().unwrap()[0].image.as_deref(),
            config.image_fallback("VALIDATOR_IMAGE")
        );
        assert_eq!(pod.containers[0].image.as_deref(), config.image_fallback("DCGM_EXPORTER_IMAGE"));
    }

    #[test]
    fn test_every_state_transform_is_idempotent() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut spec = ClusterPolicySpec::default();
        spec.cdi.enabled = Some(true);
        for state in StateName::ALL {
            let mut ds = daemonset("operand", &["main"]);
            transform_state_daemonset(state, &mut ds, &spec, &ctx).unwrap();
            let once = ds.clone();
            transform_state_daemonset(state, &mut ds, &spec, &ctx).unwrap();
            assert_eq!(ds, once, "{state}");
        }
    }
}

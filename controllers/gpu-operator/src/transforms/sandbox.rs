//! Transforms for operands serving VM workloads

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::{ClusterPolicySpec, ComponentImage};

use crate::error::ControllerError;
use crate::transforms::common::{
    add_volume, add_volume_mount, apply_component, apply_image_settings, config_map_volume, find_container_mut,
    main_container_mut, object_name, pod_spec_mut, set_env, volume_mount,
};
use crate::transforms::driver::MANAGER_CONTAINER;
use crate::transforms::validator::validator_image;
use crate::transforms::TransformContext;

pub const DEFAULT_VGPU_DEVICES_CONFIG: &str = "default-vgpu-devices-config";

/// The driver manager init container drains the node before host driver changes.
fn apply_driver_manager(ds: &mut DaemonSet, spec: &ClusterPolicySpec, ctx: &TransformContext) -> Result<(), ControllerError> {
    let pod = pod_spec_mut(ds)?;
    if let Some(manager) = find_container_mut(pod, MANAGER_CONTAINER) {
        let default_manager = ComponentImage::default();
        let image = spec.driver.settings.manager.as_ref().unwrap_or(&default_manager);
        apply_image_settings(manager, image, "DRIVER_MANAGER_IMAGE", ctx.config)?;
    }
    Ok(())
}

pub fn transform_vgpu_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.vgpu_manager.image, "VGPU_MANAGER_IMAGE", ctx.config)?;
    apply_driver_manager(ds, spec, ctx)
}

pub fn transform_vgpu_device_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.vgpu_device_manager.image, "VGPU_DEVICE_MANAGER_IMAGE", ctx.config)?;

    let config = spec.vgpu_device_manager.config.as_ref();
    let config_map = config
        .and_then(|c| c.name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_VGPU_DEVICES_CONFIG);

    let pod = pod_spec_mut(ds)?;
    add_volume(pod, config_map_volume("vgpu-config", config_map));
    let main = main_container_mut(pod, &name)?;
    add_volume_mount(main, volume_mount("vgpu-config", "/vgpu-config", true));
    set_env(main, "CONFIG_FILE", "/vgpu-config/config.yaml");
    if let Some(default) = config.and_then(|c| c.default.as_deref()).filter(|d| !d.is_empty()) {
        set_env(main, "DEFAULT_VGPU_CONFIG", default);
    }
    Ok(())
}

pub fn transform_sandbox_validator(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let image = validator_image(spec, ctx)?;
    let pod = pod_spec_mut(ds)?;
    for container in pod.containers.iter_mut().chain(pod.init_containers.iter_mut().flatten()) {
        container.image = Some(image.clone());
    }
    Ok(())
}

pub fn transform_vfio_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.vfio_manager.image, "VFIO_MANAGER_IMAGE", ctx.config)?;
    apply_driver_manager(ds, spec, ctx)
}

pub fn transform_sandbox_device_plugin(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.sandbox_device_plugin.image, "SANDBOX_DEVICE_PLUGIN_IMAGE", ctx.config)
}

pub fn transform_kata_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.kata_manager.image, "KATA_MANAGER_IMAGE", ctx.config)
}

pub fn transform_cc_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.cc_manager.image, "CC_MANAGER_IMAGE", ctx.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::runtime::Runtime;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;
    use k8s_openapi::api::core::v1::Container;

    #[test]
    fn test_vfio_manager_fills_driver_manager() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut ds = daemonset("nvidia-vfio-manager", &["nvidia-vfio-manager"]);
        ds.spec.as_mut().unwrap().template.spec.as_mut().unwrap().init_containers = Some(vec![Container {
            name: MANAGER_CONTAINER.to_string(),
            ..Default::default()
        }]);
        transform_vfio_manager(&mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), config.image_fallback("VFIO_MANAGER_IMAGE"));
        assert_eq!(
            pod.init_containers.as_ref().unwrap()[0].image.as_deref(),
            config.image_fallback("DRIVER_MANAGER_IMAGE")
        );
    }

    #[test]
    fn test_vgpu_device_manager_default_config() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut ds = daemonset("nvidia-vgpu-device-manager", &["nvidia-vgpu-device-manager"]);
        transform_vgpu_device_manager(&mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(get_env(&pod.containers[0], "CONFIG_FILE"), Some("/vgpu-config/config.yaml"));
        assert!(pod.volumes.iter().flatten().any(|v| v.name == "vgpu-config"));
    }
}

//! Device plugin, MPS control daemon and GPU feature discovery transforms

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::error::ControllerError;
use crate::transforms::cdi::transform_device_plugin_cdi;
use crate::transforms::common::{
    add_volume, add_volume_mount, apply_component, config_map_volume, host_path_volume, main_container_mut,
    object_name, pod_spec_mut, set_env, volume_mount,
};
use crate::transforms::TransformContext;

const CONFIG_VOLUME: &str = "device-plugin-config";
const CONFIG_MOUNT: &str = "/config";
const MPS_VOLUME: &str = "mps-root";
pub const DEFAULT_MPS_ROOT: &str = "/run/nvidia/mps";

/// Plugin config map, MPS root and MIG strategy shared by the plugin-derived operands.
fn apply_plugin_settings(ds: &mut DaemonSet, spec: &ClusterPolicySpec) -> Result<(), ControllerError> {
    let name = object_name(ds);
    let pod = pod_spec_mut(ds)?;

    let mps_root = spec
        .device_plugin
        .mps_root
        .as_deref()
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_MPS_ROOT);
    add_volume(pod, host_path_volume(MPS_VOLUME, mps_root, Some("DirectoryOrCreate")));

    let config = spec
        .device_plugin
        .config
        .as_ref()
        .and_then(|c| c.name.as_deref().map(|n| (n, c.default.as_deref())))
        .filter(|(n, _)| !n.is_empty());
    if let Some((config_map, _)) = config {
        add_volume(pod, config_map_volume(CONFIG_VOLUME, config_map));
    }

    let main = main_container_mut(pod, &name)?;
    set_env(main, "MIG_STRATEGY", spec.mig.strategy.as_str());
    set_env(main, "MPS_ROOT", mps_root);
    add_volume_mount(main, volume_mount(MPS_VOLUME, mps_root, false));
    if let Some((_, default)) = config {
        add_volume_mount(main, volume_mount(CONFIG_VOLUME, CONFIG_MOUNT, true));
        set_env(main, "CONFIG_FILE_SRCDIR", CONFIG_MOUNT);
        if let Some(default) = default.filter(|d| !d.is_empty()) {
            set_env(main, "DEFAULT_CONFIG", default);
        }
    }
    Ok(())
}

pub fn transform_device_plugin(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.device_plugin.image, "DEVICE_PLUGIN_IMAGE", ctx.config)?;
    apply_plugin_settings(ds, spec)?;
    let main = main_container_mut(pod_spec_mut(ds)?, &name)?;
    transform_device_plugin_cdi(main, &spec.cdi)
}

/// The MPS control daemon ships in the device plugin image.
pub fn transform_mps_control_daemon(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.device_plugin.image, "MPS_CONTROL_DAEMON_IMAGE", ctx.config)?;
    apply_plugin_settings(ds, spec)
}

pub fn transform_gfd(ds: &mut DaemonSet, spec: &ClusterPolicySpec, ctx: &TransformContext) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.gfd.image, "GFD_IMAGE", ctx.config)?;
    let main = main_container_mut(pod_spec_mut(ds)?, &name)?;
    set_env(main, "MIG_STRATEGY", spec.mig.strategy.as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::runtime::Runtime;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;
    use crds::{ConfigMapRef, MigStrategy};

    #[test]
    fn test_device_plugin_settings() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut spec = ClusterPolicySpec::default();
        spec.mig.strategy = MigStrategy::Mixed;
        spec.device_plugin.config = Some(ConfigMapRef {
            name: Some("plugin-config".into()),
            default: Some("a100".into()),
        });

        let mut ds = daemonset("nvidia-device-plugin-daemonset", &["nvidia-device-plugin"]);
        transform_device_plugin(&mut ds, &spec, &ctx).unwrap();

        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let main = &pod.containers[0];
        assert_eq!(get_env(main, "MIG_STRATEGY"), Some("mixed"));
        assert_eq!(get_env(main, "DEFAULT_CONFIG"), Some("a100"));
        assert_eq!(get_env(main, "DEVICE_LIST_STRATEGY"), Some("envvar"));
        assert_eq!(get_env(main, "MPS_ROOT"), Some(DEFAULT_MPS_ROOT));
        assert!(pod.volumes.iter().flatten().any(|v| v.name == CONFIG_VOLUME));
    }

    #[test]
    fn test_gfd_strategy() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut ds = daemonset("gpu-feature-discovery", &["gpu-feature-discovery"]);
        transform_gfd(&mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let main = &ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(get_env(main, "MIG_STRATEGY"), Some("single"));
        assert_eq!(main.image.as_deref(), config.image_fallback("GFD_IMAGE"));
    }
}

//! MIG manager DaemonSet transform

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::error::ControllerError;
use crate::transforms::common::{
    add_volume, add_volume_mount, apply_component, config_map_volume, main_container_mut, object_name, pod_spec_mut,
    set_env, volume_mount,
};
use crate::transforms::TransformContext;

pub const DEFAULT_MIG_CONFIG: &str = "default-mig-parted-config";
pub const DEFAULT_GPU_CLIENTS_CONFIG: &str = "default-gpu-clients";

pub fn transform_mig_manager(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.mig_manager.image, "MIG_MANAGER_IMAGE", ctx.config)?;

    let config_name = |reference: &Option<crds::ConfigMapRef>, default: &'static str| -> String {
        reference
            .as_ref()
            .and_then(|r| r.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default.to_string())
    };
    let mig_config = config_name(&spec.mig_manager.config, DEFAULT_MIG_CONFIG);
    let clients_config = config_name(&spec.mig_manager.gpu_clients_config, DEFAULT_GPU_CLIENTS_CONFIG);

    let pod = pod_spec_mut(ds)?;
    add_volume(pod, config_map_volume("mig-parted-config", &mig_config));
    add_volume(pod, config_map_volume("gpu-clients", &clients_config));

    let main = main_container_mut(pod, &name)?;
    add_volume_mount(main, volume_mount("mig-parted-config", "/mig-parted-config", true));
    add_volume_mount(main, volume_mount("gpu-clients", "/gpu-clients", true));
    set_env(main, "CONFIG_FILE", "/mig-parted-config/config.yaml");
    set_env(main, "GPU_CLIENTS_FILE", "/gpu-clients/clients.yaml");
    if let Some(default) = spec
        .mig_manager
        .config
        .as_ref()
        .and_then(|c| c.default.as_deref())
        .filter(|d| !d.is_empty())
    {
        set_env(main, "DEFAULT_MIG_CONFIG", default);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::runtime::Runtime;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;
    use crds::ConfigMapRef;

    #[test]
    fn test_default_and_custom_config_maps() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };

        let mut ds = daemonset("nvidia-mig-manager", &["nvidia-mig-manager"]);
        transform_mig_manager(&mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let volume = |ds: &DaemonSet, name: &str| -> Option<String> {
            ds.spec.as_ref()?.template.spec.as_ref()?.volumes.as_ref()?.iter().find(|v| v.name == name)?.config_map.as_ref().map(|c| format!("{:?}", c.name))
        };
        assert!(volume(&ds, "mig-parted-config").unwrap().contains(DEFAULT_MIG_CONFIG));

        let mut spec = ClusterPolicySpec::default();
        spec.mig_manager.config = Some(ConfigMapRef {
            name: Some("custom-mig".into()),
            default: Some("all-disabled".into()),
        });
        let mut ds = daemonset("nvidia-mig-manager", &["nvidia-mig-manager"]);
        transform_mig_manager(&mut ds, &spec, &ctx).unwrap();
        assert!(volume(&ds, "mig-parted-config").unwrap().contains("custom-mig"));
        assert!(volume(&ds, "gpu-clients").unwrap().contains(DEFAULT_GPU_CLIENTS_CONFIG));
        let main = &ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(get_env(main, "DEFAULT_MIG_CONFIG"), Some("all-disabled"));
    }
}

//! Container toolkit DaemonSet transform

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::error::ControllerError;
use crate::node::runtime::Runtime;
use crate::transforms::cdi::transform_toolkit_cdi;
use crate::transforms::common::{
    add_volume, apply_component, host_path_volume, main_container_mut, object_name, pod_spec_mut, set_env,
};
use crate::transforms::runtime::transform_runtime;
use crate::transforms::TransformContext;

pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/nvidia";

pub fn transform_toolkit(ds: &mut DaemonSet, spec: &ClusterPolicySpec, ctx: &TransformContext) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.toolkit.image, "CONTAINER_TOOLKIT_IMAGE", ctx.config)?;

    let pod = pod_spec_mut(ds)?;
    let install_dir = spec
        .toolkit
        .install_dir
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_INSTALL_DIR);
    add_volume(pod, host_path_volume("toolkit-install-dir", install_dir, Some("DirectoryOrCreate")));

    transform_runtime(pod, &name, ctx.runtime)?;

    let main = main_container_mut(pod, &name)?;
    set_env(main, "TOOLKIT_INSTALL_DIR", install_dir);
    if ctx.runtime == Runtime::Containerd {
        set_env(main, "CONTAINERD_RUNTIME_CLASS", spec.operator.runtime_class_name());
    }
    transform_toolkit_cdi(main, &spec.cdi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;

    #[test]
    fn test_toolkit_containerd() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut spec = ClusterPolicySpec::default();
        spec.operator.runtime_class = Some("nvidia-cdi".into());
        spec.cdi.enabled = Some(true);

        let mut ds = daemonset("nvidia-container-toolkit-daemonset", &["nvidia-container-toolkit-ctr"]);
        transform_toolkit(&mut ds, &spec, &ctx).unwrap();

        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let main = &pod.containers[0];
        assert_eq!(main.image.as_deref(), config.image_fallback("CONTAINER_TOOLKIT_IMAGE"));
        assert_eq!(get_env(main, "RUNTIME"), Some("containerd"));
        assert_eq!(get_env(main, "CONTAINERD_RUNTIME_CLASS"), Some("nvidia-cdi"));
        assert_eq!(get_env(main, "CDI_ENABLED"), Some("true"));
        assert_eq!(get_env(main, "TOOLKIT_INSTALL_DIR"), Some(DEFAULT_INSTALL_DIR));
    }

    #[test]
    fn test_toolkit_crio_has_no_runtime_class_env() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Crio,
            openshift: true,
        };
        let mut ds = daemonset("nvidia-container-toolkit-daemonset", &["nvidia-container-toolkit-ctr"]);
        transform_toolkit(&mut ds, &ClusterPolicySpec::default(), &ctx).unwrap();
        let main = &ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(get_env(main, "RUNTIME"), Some("crio"));
        assert!(get_env(main, "CONTAINERD_RUNTIME_CLASS").is_none());
    }
}

//! Operator validator DaemonSet transform

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::error::ControllerError;
use crate::transforms::common::{
    apply_env, apply_pull_secrets, find_container_mut, image_path, pod_spec_mut, set_env,
};
use crate::transforms::TransformContext;

pub const VALIDATOR_IMAGE_ENV: &str = "VALIDATOR_IMAGE";

/// Resolved validator image, also used for validation init containers of other operands.
pub fn validator_image(spec: &ClusterPolicySpec, ctx: &TransformContext) -> Result<String, ControllerError> {
    image_path(&spec.validator.image, VALIDATOR_IMAGE_ENV, ctx.config)
}

pub fn transform_validator(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let image = validator_image(spec, ctx)?;
    let pod = pod_spec_mut(ds)?;

    let all = pod.containers.iter_mut().chain(pod.init_containers.iter_mut().flatten());
    for container in all {
        container.image = Some(image.clone());
        if let Some(policy) = spec.validator.image.image_pull_policy.as_deref().filter(|p| !p.is_empty()) {
            container.image_pull_policy = Some(policy.to_string());
        }
        apply_env(container, &spec.validator.image.env);
    }
    apply_pull_secrets(pod, &spec.validator.image.image_pull_secrets);

    for (container, env) in [
        ("driver-validation", &spec.validator.driver_env),
        ("toolkit-validation", &spec.validator.toolkit_env),
        ("cuda-validation", &spec.validator.cuda_env),
        ("plugin-validation", &spec.validator.plugin_env),
    ] {
        if let Some(c) = find_container_mut(pod, container) {
            apply_env(c, env);
        }
    }
    if let Some(plugin) = find_container_mut(pod, "plugin-validation") {
        set_env(plugin, "MIG_STRATEGY", spec.mig.strategy.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::runtime::Runtime;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;
    use crds::EnvVar;
    use k8s_openapi::api::core::v1::Container;

    #[test]
    fn test_per_component_env() {
        let config = test_config();
        let ctx = TransformContext {
            config: &config,
            runtime: Runtime::Containerd,
            openshift: false,
        };
        let mut spec = ClusterPolicySpec::default();
        spec.validator.cuda_env = vec![EnvVar {
            name: "WITH_WORKLOAD".into(),
            value: Some("false".into()),
        }];

        let mut ds = daemonset("nvidia-operator-validator", &["nvidia-operator-validator"]);
        let pod = ds.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        pod.init_containers = Some(
            ["driver-validation", "cuda-validation", "plugin-validation"]
                .iter()
                .map(|n| Container {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
        );

        transform_validator(&mut ds, &spec, &ctx).unwrap();
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let init = pod.init_containers.as_ref().unwrap();
        assert!(init.iter().all(|c| c.image.as_deref() == config.image_fallback(VALIDATOR_IMAGE_ENV)));
        assert_eq!(get_env(&init[1], "WITH_WORKLOAD"), Some("false"));
        assert!(get_env(&init[0], "WITH_WORKLOAD").is_none());
        assert_eq!(get_env(&init[2], "MIG_STRATEGY"), Some("single"));
    }
}

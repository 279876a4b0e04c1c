//! DCGM, DCGM exporter and node status exporter transforms

use k8s_openapi::api::apps::v1::DaemonSet;

use crds::ClusterPolicySpec;

use crate::error::ControllerError;
use crate::transforms::common::{
    add_volume, add_volume_mount, apply_component, config_map_volume, main_container_mut, object_name, pod_spec_mut,
    set_env, volume_mount,
};
use crate::transforms::TransformContext;

/// Host engine port of the standalone DCGM pod
pub const DCGM_PORT: i32 = 5555;
const METRICS_CONFIG_VOLUME: &str = "metrics-config";
const METRICS_CONFIG_DIR: &str = "/etc/dcgm-exporter/custom";

pub fn transform_dcgm(ds: &mut DaemonSet, spec: &ClusterPolicySpec, ctx: &TransformContext) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.dcgm.image, "DCGM_IMAGE", ctx.config)?;

    if let Some(host_port) = spec.dcgm.host_port.filter(|p| *p > 0) {
        let main = main_container_mut(pod_spec_mut(ds)?, &name)?;
        if let Some(port) = main.ports.iter_mut().flatten().find(|p| p.container_port == DCGM_PORT) {
            port.host_port = Some(host_port);
        }
    }
    Ok(())
}

pub fn transform_dcgm_exporter(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    apply_component(ds, &spec.dcgm_exporter.image, "DCGM_EXPORTER_IMAGE", ctx.config)?;

    let pod = pod_spec_mut(ds)?;
    let metrics_config = spec
        .dcgm_exporter
        .config
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .filter(|n| !n.is_empty());
    if let Some(config_map) = metrics_config {
        add_volume(pod, config_map_volume(METRICS_CONFIG_VOLUME, config_map));
    }

    let main = main_container_mut(pod, &name)?;
    if spec.dcgm_enabled() {
        set_env(main, "DCGM_REMOTE_HOSTENGINE_INFO", format!("nvidia-dcgm:{}", DCGM_PORT));
    }
    if metrics_config.is_some() {
        add_volume_mount(main, volume_mount(METRICS_CONFIG_VOLUME, METRICS_CONFIG_DIR, true));
        set_env(
            main,
            "DCGM_EXPORTER_COLLECTORS",
            format!("{}/dcgm-metrics.csv", METRICS_CONFIG_DIR),
        );
    }
    Ok(())
}

pub fn transform_node_status_exporter(
    ds: &mut DaemonSet,
    spec: &ClusterPolicySpec,
    ctx: &TransformContext,
) -> Result<(), ControllerError> {
    apply_component(ds, &spec.node_status_exporter.image, "NODE_STATUS_EXPORTER_IMAGE", ctx.config)
}

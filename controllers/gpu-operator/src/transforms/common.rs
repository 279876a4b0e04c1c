//! Helpers shared by the per-component transforms

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetUpdateStrategy, RollingUpdateDaemonSet};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, HostPathVolumeSource, LocalObjectReference, PodSpec,
    ResourceRequirements, SecretVolumeSource, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crds::{ComponentImage, DaemonsetsSpec};

use crate::config::OperatorConfig;
use crate::error::ControllerError;

/// Image value in templates that must be replaced before apply
pub const IMAGE_PLACEHOLDER: &str = "FILLED_BY_OPERATOR";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Resolves an image reference.
///
/// A full triplet yields `repo/image:version`, or `repo/image@sha256:...` for
/// digests. A bare `image` is taken as a complete reference. Otherwise the
/// operator's fallback environment variable is used.
pub fn image_path(image: &ComponentImage, fallback_env: &str, config: &OperatorConfig) -> Result<String, ControllerError> {
    match (non_empty(&image.repository), non_empty(&image.image), non_empty(&image.version)) {
        (Some(repo), Some(name), Some(version)) => {
            if version.starts_with("sha256:") {
                Ok(format!("{}/{}@{}", repo, name, version))
            } else {
                Ok(format!("{}/{}:{}", repo, name, version))
            }
        }
        (None, Some(full), None) => Ok(full.to_string()),
        _ => config
            .image_fallback(fallback_env)
            .map(str::to_string)
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "image not configured and {} is not set",
                    fallback_env
                ))
            }),
    }
}

pub fn object_name(ds: &DaemonSet) -> String {
    ds.metadata.name.clone().unwrap_or_default()
}

pub fn pod_spec_mut(ds: &mut DaemonSet) -> Result<&mut PodSpec, ControllerError> {
    let name = object_name(ds);
    ds.spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .ok_or_else(|| ControllerError::transform(&name, "DaemonSet has no pod template spec"))
}

/// The operand container is always listed first.
pub fn main_container_mut<'a>(pod: &'a mut PodSpec, object: &str) -> Result<&'a mut Container, ControllerError> {
    pod.containers
        .first_mut()
        .ok_or_else(|| ControllerError::transform(object, "pod template has no containers"))
}

pub fn find_container_mut<'a>(pod: &'a mut PodSpec, name: &str) -> Option<&'a mut Container> {
    if let Some(idx) = pod.containers.iter().position(|c| c.name == name) {
        return pod.containers.get_mut(idx);
    }
    pod.init_containers
        .as_mut()
        .and_then(|init| init.iter_mut().find(|c| c.name == name))
}

pub fn remove_container(pod: &mut PodSpec, name: &str) {
    pod.containers.retain(|c| c.name != name);
}

pub fn get_env<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
        .filter(|v| !v.is_empty())
}

pub fn set_env(container: &mut Container, name: &str, value: impl Into<String>) {
    let value = Some(value.into());
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = value;
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value,
            ..Default::default()
        }),
    }
}

pub fn remove_env(container: &mut Container, name: &str) {
    if let Some(env) = container.env.as_mut() {
        env.retain(|e| e.name != name);
    }
}

pub fn apply_env(container: &mut Container, env: &[crds::EnvVar]) {
    for var in env {
        set_env(container, &var.name, var.value.clone().unwrap_or_default());
    }
}

/// Adds the volume, replacing one with the same name.
pub fn add_volume(pod: &mut PodSpec, volume: Volume) {
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == volume.name) {
        Some(existing) => *existing = volume,
        None => volumes.push(volume),
    }
}

/// Adds the mount, replacing one at the same path or with the same name and sub path.
pub fn add_volume_mount(container: &mut Container, mount: VolumeMount) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts
        .iter_mut()
        .find(|m| m.mount_path == mount.mount_path || (m.name == mount.name && m.sub_path == mount.sub_path))
    {
        Some(existing) => *existing = mount,
        None => mounts.push(mount),
    }
}

pub fn host_path_volume(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Volume {
    let mut source = ConfigMapVolumeSource::default();
    source.name = config_map.to_string().into();
    Volume {
        name: name.to_string(),
        config_map: Some(source),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn volume_mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn to_quantities(values: &std::collections::BTreeMap<String, String>) -> Option<std::collections::BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect())
}

fn to_resources(resources: &crds::ResourceRequirements) -> ResourceRequirements {
    ResourceRequirements {
        limits: to_quantities(&resources.limits),
        requests: to_quantities(&resources.requests),
        ..Default::default()
    }
}

pub fn apply_pull_secrets(pod: &mut PodSpec, secrets: &[String]) {
    if secrets.is_empty() {
        return;
    }
    let existing = pod.image_pull_secrets.get_or_insert_with(Vec::new);
    for secret in secrets {
        if !existing.iter().any(|s| &s.name == secret) {
            existing.push(LocalObjectReference { name: secret.clone() });
        }
    }
}

/// Image, pull policy, env, args and resources onto one container.
pub fn apply_image_settings(
    container: &mut Container,
    image: &ComponentImage,
    fallback_env: &str,
    config: &OperatorConfig,
) -> Result<(), ControllerError> {
    container.image = Some(image_path(image, fallback_env, config)?);
    if let Some(policy) = non_empty(&image.image_pull_policy) {
        container.image_pull_policy = Some(policy.to_string());
    }
    apply_env(container, &image.env);
    if !image.args.is_empty() {
        container.args = Some(image.args.clone());
    }
    if let Some(resources) = &image.resources {
        container.resources = Some(to_resources(resources));
    }
    Ok(())
}

/// Image settings onto the main container plus the pod's pull secrets.
pub fn apply_component(
    ds: &mut DaemonSet,
    image: &ComponentImage,
    fallback_env: &str,
    config: &OperatorConfig,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    let pod = pod_spec_mut(ds)?;
    apply_image_settings(main_container_mut(pod, &name)?, image, fallback_env, config)?;
    apply_pull_secrets(pod, &image.image_pull_secrets);
    Ok(())
}

/// Replaces leftover image placeholders (validation init containers).
pub fn fill_placeholder_images(pod: &mut PodSpec, image: &str) {
    let init = pod.init_containers.iter_mut().flatten();
    for container in pod.containers.iter_mut().chain(init) {
        if container.image.as_deref().is_none_or(|i| i.is_empty() || i == IMAGE_PLACEHOLDER) {
            container.image = Some(image.to_string());
        }
    }
}

pub fn has_placeholder_images(pod: &PodSpec) -> bool {
    let init = pod.init_containers.iter().flatten();
    pod.containers
        .iter()
        .chain(init)
        .any(|c| c.image.as_deref().is_none_or(|i| i.is_empty() || i == IMAGE_PLACEHOLDER))
}

fn to_toleration(t: &crds::Toleration) -> Toleration {
    Toleration {
        key: t.key.clone(),
        operator: t.operator.clone(),
        value: t.value.clone(),
        effect: t.effect.clone(),
        toleration_seconds: t.toleration_seconds,
    }
}

/// Pod-level labels, annotations, tolerations and priority class.
pub fn apply_pod_metadata(
    ds: &mut DaemonSet,
    labels: &std::collections::BTreeMap<String, String>,
    annotations: &std::collections::BTreeMap<String, String>,
    tolerations: &[crds::Toleration],
    priority_class_name: Option<&str>,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    let spec = ds
        .spec
        .as_mut()
        .ok_or_else(|| ControllerError::transform(&name, "DaemonSet has no spec"))?;
    let meta = spec.template.metadata.get_or_insert_with(Default::default);
    if !labels.is_empty() {
        meta.labels
            .get_or_insert_with(Default::default)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if !annotations.is_empty() {
        meta.annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let pod = pod_spec_mut(ds)?;
    if !tolerations.is_empty() {
        let existing = pod.tolerations.get_or_insert_with(Vec::new);
        for toleration in tolerations.iter().map(to_toleration) {
            if !existing.contains(&toleration) {
                existing.push(toleration);
            }
        }
    }
    if let Some(priority) = priority_class_name.filter(|p| !p.is_empty()) {
        pod.priority_class_name = Some(priority.to_string());
    }
    Ok(())
}

/// Settings from `ClusterPolicy.spec.daemonsets`.
pub fn apply_daemonsets_config(ds: &mut DaemonSet, config: &DaemonsetsSpec) -> Result<(), ControllerError> {
    apply_pod_metadata(
        ds,
        &config.labels,
        &config.annotations,
        &config.tolerations,
        config.priority_class_name.as_deref(),
    )?;

    let name = object_name(ds);
    let spec = ds
        .spec
        .as_mut()
        .ok_or_else(|| ControllerError::transform(&name, "DaemonSet has no spec"))?;
    match config.update_strategy.as_deref() {
        Some("OnDelete") => {
            spec.update_strategy = Some(DaemonSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                rolling_update: None,
            });
        }
        None | Some("") | Some("RollingUpdate") => {
            let max_unavailable = config
                .rolling_update_max_unavailable
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| match v.parse::<i32>() {
                    Ok(n) => IntOrString::Int(n),
                    Err(_) => IntOrString::String(v.to_string()),
                });
            if config.update_strategy.is_some() || max_unavailable.is_some() {
                spec.update_strategy = Some(DaemonSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(RollingUpdateDaemonSet {
                        max_unavailable,
                        max_surge: None,
                    }),
                });
            }
        }
        Some(other) => {
            return Err(ControllerError::transform(
                &name,
                format!("unknown update strategy {:?}", other),
            ));
        }
    }
    Ok(())
}

//! Driver DaemonSet transform
//!
//! Shared by the ClusterPolicy driver state and NVIDIADriver pools.

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{EnvFromSource, SecretEnvSource, VolumeMount};
use sha2::{Digest, Sha256};

use crds::{ComponentImage, ConfigMapRef, DriverSettings, HostPathsSpec};

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::transforms::common::{
    add_volume, add_volume_mount, apply_image_settings, apply_pull_secrets, config_map_volume, find_container_mut,
    host_path_volume, main_container_mut, object_name, pod_spec_mut, remove_container, remove_env, secret_volume,
    set_env, volume_mount,
};

pub const DRIVER_CONTAINER: &str = "nvidia-driver-ctr";
pub const GDS_CONTAINER: &str = "nvidia-fs-ctr";
pub const GDRCOPY_CONTAINER: &str = "nvidia-gdrcopy-ctr";
pub const PEERMEM_CONTAINER: &str = "nvidia-peermem-ctr";
pub const MANAGER_CONTAINER: &str = "k8s-driver-manager";

/// Env var carrying the digest of the rendered pod template
pub const CONFIG_DIGEST_ENV: &str = "DRIVER_CONFIG_DIGEST";

const LICENSING_VOLUME: &str = "licensing-config";
const TOPOLOGY_VOLUME: &str = "topology-config";

fn sub_path_mount(volume: &str, mount_path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        sub_path: Some(sub_path.to_string()),
        ..volume_mount(volume, mount_path, true)
    }
}

fn config_map_name(reference: &Option<ConfigMapRef>) -> Option<&str> {
    reference
        .as_ref()
        .and_then(|r| r.name.as_deref())
        .filter(|n| !n.is_empty())
}

fn sibling(
    ds: &mut DaemonSet,
    container: &str,
    enabled: bool,
    image: Option<&ComponentImage>,
    fallback_env: &str,
    config: &OperatorConfig,
) -> Result<(), ControllerError> {
    let pod = pod_spec_mut(ds)?;
    if !enabled {
        remove_container(pod, container);
        return Ok(());
    }
    let default_image = ComponentImage::default();
    let image = image.unwrap_or(&default_image);
    if let Some(c) = find_container_mut(pod, container) {
        apply_image_settings(c, image, fallback_env, config)?;
    }
    apply_pull_secrets(pod, &image.image_pull_secrets);
    Ok(())
}

/// Applies driver settings to a driver DaemonSet.
pub fn transform_driver(
    ds: &mut DaemonSet,
    settings: &DriverSettings,
    host_paths: &HostPathsSpec,
    config: &OperatorConfig,
) -> Result<(), ControllerError> {
    let name = object_name(ds);
    settings.validate()?;

    let driver_image;
    {
        let pod = pod_spec_mut(ds)?;
        let main = main_container_mut(pod, &name)?;
        apply_image_settings(main, &settings.image, "DRIVER_IMAGE", config)?;
        driver_image = main.image.clone().unwrap_or_default();

        if let Some(secret) = settings.secret_env.as_deref().filter(|s| !s.is_empty()) {
            let mut source = SecretEnvSource::default();
            source.name = secret.to_string().into();
            let env_from = main.env_from.get_or_insert_with(Vec::new);
            env_from.retain(|e| e.secret_ref.is_none());
            env_from.push(EnvFromSource {
                secret_ref: Some(source),
                ..Default::default()
            });
        }

        if settings.rdma_enabled() {
            set_env(main, "GPU_DIRECT_RDMA_ENABLED", "true");
        }
        if settings.precompiled() {
            set_env(main, "USE_PRECOMPILED", "true");
        }
        apply_pull_secrets(pod, &settings.image.image_pull_secrets);
    }

    sibling(ds, GDS_CONTAINER, settings.gds_enabled(), settings.gds.as_ref().map(|g| &g.image), "GDS_IMAGE", config)?;
    sibling(
        ds,
        GDRCOPY_CONTAINER,
        settings.gdrcopy_enabled(),
        settings.gdrcopy.as_ref().map(|g| &g.image),
        "GDRCOPY_IMAGE",
        config,
    )?;

    let pod = pod_spec_mut(ds)?;
    if settings.rdma_enabled() {
        if let Some(peermem) = find_container_mut(pod, PEERMEM_CONTAINER) {
            peermem.image = Some(driver_image.clone());
            let host_mofed = settings.rdma.as_ref().is_some_and(|r| r.use_host_mofed.unwrap_or(false));
            set_env(peermem, "USE_HOST_MOFED", host_mofed.to_string());
        }
    } else {
        remove_container(pod, PEERMEM_CONTAINER);
    }

    if let Some(manager) = find_container_mut(pod, MANAGER_CONTAINER) {
        let default_manager = ComponentImage::default();
        apply_image_settings(
            manager,
            settings.manager.as_ref().unwrap_or(&default_manager),
            "DRIVER_MANAGER_IMAGE",
            config,
        )?;
    }

    if let Some(licensing) = &settings.licensing_config {
        let secret = licensing.secret_name.as_deref().filter(|s| !s.is_empty());
        let config_map = licensing.config_map_name.as_deref().filter(|s| !s.is_empty());
        let volume = match (secret, config_map) {
            (Some(s), _) => Some(secret_volume(LICENSING_VOLUME, s)),
            (None, Some(cm)) => Some(config_map_volume(LICENSING_VOLUME, cm)),
            (None, None) => None,
        };
        if let Some(volume) = volume {
            add_volume(pod, volume);
            let main = main_container_mut(pod, &name)?;
            add_volume_mount(main, sub_path_mount(LICENSING_VOLUME, "/drivers/gridd.conf", "gridd.conf"));
            if licensing.nls_enabled.unwrap_or(true) {
                add_volume_mount(
                    main,
                    sub_path_mount(
                        LICENSING_VOLUME,
                        "/drivers/ClientConfigToken/client_configuration_token.tok",
                        "client_configuration_token.tok",
                    ),
                );
            }
        }
        if let Some(nls) = licensing.nls_enabled {
            set_env(main_container_mut(pod, &name)?, "NLS_ENABLED", nls.to_string());
        }
    }

    if let Some(topology) = settings
        .virtual_topology
        .as_ref()
        .and_then(|t| t.config.as_deref())
        .filter(|c| !c.is_empty())
    {
        add_volume(pod, config_map_volume(TOPOLOGY_VOLUME, topology));
        add_volume_mount(
            main_container_mut(pod, &name)?,
            sub_path_mount(TOPOLOGY_VOLUME, "/etc/nvidia/nvidia-topologyd.conf", "virtual-topology.conf"),
        );
    }

    for (reference, volume, path) in [
        (&settings.kernel_module_config, "kernel-module-config", "/drivers/kernel-module-params"),
        (&settings.repo_config, "repo-config", "/drivers/repo-config"),
        (&settings.cert_config, "cert-config", "/drivers/certs"),
    ] {
        if let Some(cm) = config_map_name(reference) {
            add_volume(pod, config_map_volume(volume, cm));
            add_volume_mount(main_container_mut(pod, &name)?, volume_mount(volume, path, true));
        }
    }

    if let Some(dir) = host_paths.driver_install_dir.as_deref().filter(|d| !d.is_empty()) {
        add_volume(pod, host_path_volume("driver-install-dir", dir, Some("DirectoryOrCreate")));
    }
    if let Some(root) = host_paths.root_fs.as_deref().filter(|d| !d.is_empty()) {
        add_volume(pod, host_path_volume("host-root", root, None));
    }

    set_config_digest(ds)
}

/// Stamps the SHA-256 of the pod template onto the driver container.
///
/// The digest env itself is excluded so repeated runs agree.
pub fn set_config_digest(ds: &mut DaemonSet) -> Result<(), ControllerError> {
    let name = object_name(ds);
    remove_env(main_container_mut(pod_spec_mut(ds)?, &name)?, CONFIG_DIGEST_ENV);

    let template = ds
        .spec
        .as_ref()
        .map(|s| &s.template)
        .ok_or_else(|| ControllerError::transform(&name, "DaemonSet has no spec"))?;
    let digest = format!("{:x}", Sha256::digest(serde_json::to_vec(template)?));

    set_env(main_container_mut(pod_spec_mut(ds)?, &name)?, CONFIG_DIGEST_ENV, digest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daemonset, test_config};
    use crate::transforms::common::get_env;
    use crds::{ComponentSpec, LicensingConfigSpec, RdmaSpec, VirtualTopologySpec};

    fn driver_ds() -> DaemonSet {
        daemonset(
            "nvidia-driver-daemonset",
            &[DRIVER_CONTAINER, GDS_CONTAINER, GDRCOPY_CONTAINER, PEERMEM_CONTAINER],
        )
    }

    fn container_names(ds: &DaemonSet) -> Vec<String> {
        ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers.iter().map(|c| c.name.clone()).collect()
    }

    fn main_env(ds: &DaemonSet, name: &str) -> Option<String> {
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        get_env(&pod.containers[0], name).map(str::to_string)
    }

    #[test]
    fn test_optional_siblings_removed_by_default() {
        let mut ds = driver_ds();
        transform_driver(&mut ds, &DriverSettings::default(), &HostPathsSpec::default(), &test_config()).unwrap();
        assert_eq!(container_names(&ds), vec![DRIVER_CONTAINER.to_string()]);
        assert!(main_env(&ds, CONFIG_DIGEST_ENV).is_some_and(|d| d.len() == 64));
    }

    #[test]
    fn test_siblings_kept_when_enabled() {
        let mut settings = DriverSettings::default();
        settings.image = ComponentImage {
            repository: Some("nvcr.io/nvidia".into()),
            image: Some("driver".into()),
            version: Some("550.54.15".into()),
            ..Default::default()
        };
        settings.gds = Some(ComponentSpec {
            enabled: Some(true),
            ..Default::default()
        });
        settings.rdma = Some(RdmaSpec {
            enabled: Some(true),
            use_host_mofed: Some(true),
        });

        let mut ds = driver_ds();
        transform_driver(&mut ds, &settings, &HostPathsSpec::default(), &test_config()).unwrap();
        assert_eq!(
            container_names(&ds),
            vec![DRIVER_CONTAINER.to_string(), GDS_CONTAINER.to_string(), PEERMEM_CONTAINER.to_string()]
        );
        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("nvcr.io/nvidia/driver:550.54.15"));
        assert_eq!(pod.containers[2].image.as_deref(), Some("nvcr.io/nvidia/driver:550.54.15"));
        assert_eq!(get_env(&pod.containers[2], "USE_HOST_MOFED"), Some("true"));
        assert_eq!(main_env(&ds, "GPU_DIRECT_RDMA_ENABLED").as_deref(), Some("true"));
    }

    #[test]
    fn test_licensing_and_topology_mounts() {
        let mut settings = DriverSettings::default();
        settings.licensing_config = Some(LicensingConfigSpec {
            config_map_name: Some("licensing-config".into()),
            secret_name: None,
            nls_enabled: Some(true),
        });
        settings.virtual_topology = Some(VirtualTopologySpec {
            config: Some("topology".into()),
        });
        settings.secret_env = Some("driver-secrets".into());

        let mut ds = driver_ds();
        transform_driver(&mut ds, &settings, &HostPathsSpec::default(), &test_config()).unwrap();

        let pod = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let volumes: Vec<&str> = pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert!(volumes.contains(&"licensing-config"));
        assert!(volumes.contains(&"topology-config"));
        let main = &pod.containers[0];
        let mounts: Vec<&str> = main.volume_mounts.iter().flatten().map(|m| m.mount_path.as_str()).collect();
        assert!(mounts.contains(&"/drivers/gridd.conf"));
        assert!(mounts.contains(&"/etc/nvidia/nvidia-topologyd.conf"));
        assert_eq!(get_env(main, "NLS_ENABLED"), Some("true"));
        assert_eq!(main.env_from.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_conflicting_licensing_sources_rejected() {
        let mut settings = DriverSettings::default();
        settings.licensing_config = Some(LicensingConfigSpec {
            config_map_name: Some("a".into()),
            secret_name: Some("b".into()),
            nls_enabled: None,
        });
        let err = transform_driver(&mut driver_ds(), &settings, &HostPathsSpec::default(), &test_config()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_digest_is_stable_and_tracks_config() {
        let mut settings = DriverSettings::default();
        let mut first = driver_ds();
        transform_driver(&mut first, &settings, &HostPathsSpec::default(), &test_config()).unwrap();
        let mut again = first.clone();
        transform_driver(&mut again, &settings, &HostPathsSpec::default(), &test_config()).unwrap();
        assert_eq!(first, again);

        settings.kernel_module_config = Some(ConfigMapRef {
            name: Some("kernel-module-params".into()),
            default: None,
        });
        let mut changed = driver_ds();
        transform_driver(&mut changed, &settings, &HostPathsSpec::default(), &test_config()).unwrap();
        assert_ne!(main_env(&first, CONFIG_DIGEST_ENV), main_env(&changed, CONFIG_DIGEST_ENV));
    }
}

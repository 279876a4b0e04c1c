//! Container runtime wiring for the toolkit
//!
//! Mounts the runtime's config directory, drop-in directory and socket
//! directory from the host and points the container at them. Override
//! variables hold host paths; the generic `RUNTIME_*` variables receive the
//! in-container paths.

use std::path::Path;

use k8s_openapi::api::core::v1::PodSpec;

use crate::error::ControllerError;
use crate::node::runtime::Runtime;
use crate::transforms::common::{
    add_volume, add_volume_mount, get_env, host_path_volume, main_container_mut, set_env, volume_mount,
};

pub const CONFIG_MOUNT_DIR: &str = "/runtime/config-dir";
pub const DROP_IN_MOUNT_DIR: &str = "/runtime/config-dir.d";
pub const SOCKET_MOUNT_DIR: &str = "/runtime/sock-dir";

const CONFIG_VOLUME: &str = "runtime-config";
const DROP_IN_VOLUME: &str = "runtime-drop-in-config";
const SOCKET_VOLUME: &str = "runtime-socket";

/// Host defaults for one runtime
#[derive(Debug, Clone, Copy)]
pub struct RuntimeDefaults {
    pub config: &'static str,
    pub drop_in_config: Option<&'static str>,
    pub socket: Option<&'static str>,
}

pub fn defaults(runtime: Runtime) -> RuntimeDefaults {
    match runtime {
        Runtime::Containerd => RuntimeDefaults {
            config: "/etc/containerd/config.toml",
            drop_in_config: Some("/etc/containerd/conf.d/99-nvidia.toml"),
            socket: Some("/run/containerd/containerd.sock"),
        },
        Runtime::Crio => RuntimeDefaults {
            config: "/etc/crio/crio.conf",
            drop_in_config: Some("/etc/crio/crio.conf.d/99-nvidia.toml"),
            socket: None,
        },
        Runtime::Docker => RuntimeDefaults {
            config: "/etc/docker/daemon.json",
            drop_in_config: None,
            socket: Some("/var/run/docker.sock"),
        },
    }
}

fn env_prefix(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Containerd => "CONTAINERD",
        Runtime::Crio => "CRIO",
        Runtime::Docker => "DOCKER",
    }
}

/// Resolves a host path: absolute overrides win, relative ones sit next to the default.
pub fn resolve_host_path(override_path: Option<&str>, default: &str) -> String {
    match override_path.filter(|p| !p.is_empty()) {
        None => default.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => match Path::new(default).parent() {
            Some(dir) => dir.join(p).display().to_string(),
            None => p.to_string(),
        },
    }
}

fn split_host_path(path: &str) -> Result<(String, String), ControllerError> {
    let p = Path::new(path);
    match (p.parent(), p.file_name()) {
        (Some(dir), Some(file)) => Ok((dir.display().to_string(), file.to_string_lossy().into_owned())),
        _ => Err(ControllerError::InvalidConfig(format!("runtime path {:?} has no parent directory", path))),
    }
}

/// Mounts the parent of a host file and sets both env values.
fn wire_path(
    pod: &mut PodSpec,
    object: &str,
    runtime: Runtime,
    suffix: &str,
    default: &str,
    volume: &str,
    mount_dir: &str,
) -> Result<(), ControllerError> {
    let specific = format!("{}_{}", env_prefix(runtime), suffix);
    let generic = format!("RUNTIME_{}", suffix);

    let container = main_container_mut(pod, object)?;
    let chosen = get_env(container, &specific)
        .or_else(|| get_env(container, &generic).filter(|v| !v.starts_with(mount_dir)))
        .map(str::to_string);
    let host_path = resolve_host_path(chosen.as_deref(), default);
    let (host_dir, file) = split_host_path(&host_path)?;

    add_volume_mount(container, volume_mount(volume, mount_dir, false));
    set_env(container, &specific, host_path);
    set_env(container, &generic, format!("{}/{}", mount_dir, file));
    add_volume(pod, host_path_volume(volume, &host_dir, Some("DirectoryOrCreate")));
    Ok(())
}

/// Wires the main container of `pod` for `runtime`.
pub fn transform_runtime(pod: &mut PodSpec, object: &str, runtime: Runtime) -> Result<(), ControllerError> {
    let defaults = defaults(runtime);
    set_env(main_container_mut(pod, object)?, "RUNTIME", runtime.as_str());

    wire_path(pod, object, runtime, "CONFIG", defaults.config, CONFIG_VOLUME, CONFIG_MOUNT_DIR)?;
    if let Some(drop_in) = defaults.drop_in_config {
        wire_path(pod, object, runtime, "DROP_IN_CONFIG", drop_in, DROP_IN_VOLUME, DROP_IN_MOUNT_DIR)?;
    }
    if let Some(socket) = defaults.socket {
        wire_path(pod, object, runtime, "SOCKET", socket, SOCKET_VOLUME, SOCKET_MOUNT_DIR)?;
    }
    Ok(())
}

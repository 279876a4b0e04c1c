//! Container Device Interface settings for the toolkit and device plugin

use k8s_openapi::api::core::v1::Container;

use crds::{CdiSpec, ValidationError};

use crate::error::ControllerError;
use crate::transforms::common::set_env;

pub const CDI_ANNOTATION_PREFIX: &str = "nvidia.cdi.k8s.io/";

fn validate(cdi: &CdiSpec) -> Result<(), ControllerError> {
    if !cdi.is_enabled() && cdi.is_nri_plugin_enabled() {
        return Err(ValidationError::NriWithoutCdi.into());
    }
    Ok(())
}

/// Toolkit side of CDI.
pub fn transform_toolkit_cdi(container: &mut Container, cdi: &CdiSpec) -> Result<(), ControllerError> {
    validate(cdi)?;
    if !cdi.is_enabled() {
        return Ok(());
    }

    set_env(container, "CDI_ENABLED", "true");
    set_env(container, "NVIDIA_CONTAINER_RUNTIME_MODES_CDI_ANNOTATION_PREFIXES", CDI_ANNOTATION_PREFIX);
    if cdi.is_default() {
        set_env(container, "NVIDIA_CONTAINER_RUNTIME_MODE", "cdi");
    }
    if cdi.is_nri_plugin_enabled() {
        set_env(container, "ENABLE_NRI_PLUGIN", "true");
        // devices are injected by the NRI plugin, not the runtime hook
        set_env(container, "NVIDIA_RUNTIME_SET_AS_DEFAULT", "false");
    }
    Ok(())
}

/// Device plugin side of CDI.
pub fn transform_device_plugin_cdi(container: &mut Container, cdi: &CdiSpec) -> Result<(), ControllerError> {
    validate(cdi)?;
    if !cdi.is_enabled() {
        set_env(container, "DEVICE_LIST_STRATEGY", "envvar");
        return Ok(());
    }

    let strategy = if cdi.is_nri_plugin_enabled() {
        "cdi-cri"
    } else {
        "cdi-annotations"
    };
    set_env(container, "DEVICE_LIST_STRATEGY", strategy);
    set_env(container, "CDI_ANNOTATION_PREFIX", CDI_ANNOTATION_PREFIX);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::common::get_env;

    #[test]
    fn test_cdi_disabled_leaves_toolkit_alone() {
        let mut c = Container::default();
        transform_toolkit_cdi(&mut c, &CdiSpec::default()).unwrap();
        assert!(c.env.is_none());
    }

    #[test]
    fn test_cdi_default_with_nri() {
        let cdi = CdiSpec {
            enabled: Some(true),
            default: Some(true),
            nri_plugin_enabled: Some(true),
        };
        let mut toolkit = Container::default();
        transform_toolkit_cdi(&mut toolkit, &cdi).unwrap();
        assert_eq!(get_env(&toolkit, "CDI_ENABLED"), Some("true"));
        assert_eq!(get_env(&toolkit, "NVIDIA_CONTAINER_RUNTIME_MODE"), Some("cdi"));
        assert_eq!(get_env(&toolkit, "ENABLE_NRI_PLUGIN"), Some("true"));
        assert_eq!(get_env(&toolkit, "NVIDIA_RUNTIME_SET_AS_DEFAULT"), Some("false"));

        let mut plugin = Container::default();
        transform_device_plugin_cdi(&mut plugin, &cdi).unwrap();
        assert_eq!(get_env(&plugin, "DEVICE_LIST_STRATEGY"), Some("cdi-cri"));
    }

    #[test]
    fn test_nri_without_cdi_rejected() {
        let cdi = CdiSpec {
            enabled: Some(false),
            default: None,
            nri_plugin_enabled: Some(true),
        };
        let err = transform_toolkit_cdi(&mut Container::default(), &cdi).unwrap_err();
        assert!(err.is_validation());
    }
}

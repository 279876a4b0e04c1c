//! Object identity used by the generic apply/delete calls

use serde_json::Value;

/// Identifies one object of any kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// `group/version` or `version` for the core group
    pub api_version: String,
    /// Object kind
    pub kind: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Reads the identifying fields from a serialized object.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            api_version: value.get("apiVersion")?.as_str()?.to_string(),
            kind: value.get("kind")?.as_str()?.to_string(),
            namespace: value
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(str::to_string),
            name: value.pointer("/metadata/name")?.as_str()?.to_string(),
        })
    }

    /// Splits the apiVersion into group and version.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Deletion propagation for dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are garbage collected in the background
    Background,
    /// Dependents are left running without an owner
    Orphan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_key_from_value() {
        let key = ObjectKey::from_value(&json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "nvidia-driver-daemonset", "namespace": "gpu-operator"}
        }))
        .unwrap();
        assert_eq!(key.group_version(), ("apps", "v1"));
        assert_eq!(key.namespace.as_deref(), Some("gpu-operator"));
        assert_eq!(key.to_string(), "DaemonSet gpu-operator/nvidia-driver-daemonset");

        let core = ObjectKey::from_value(&json!({
            "apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}
        }))
        .unwrap();
        assert_eq!(core.group_version(), ("", "v1"));
        assert!(ObjectKey::from_value(&json!({"kind": "ConfigMap"})).is_none());
    }
}

//! Typed bundle of the objects decoded from one state directory

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::node::v1::RuntimeClass;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use serde::Serialize;
use serde_json::Value;

use crate::error::ControllerError;

/// Kinds the catalog knows how to decode and control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    ConfigMap,
    DaemonSet,
    Deployment,
    Service,
    ServiceMonitor,
    PrometheusRule,
    RuntimeClass,
    SecurityContextConstraints,
}

impl Kind {
    pub const ALL: [Kind; 13] = [
        Kind::ServiceAccount,
        Kind::Role,
        Kind::RoleBinding,
        Kind::ClusterRole,
        Kind::ClusterRoleBinding,
        Kind::ConfigMap,
        Kind::DaemonSet,
        Kind::Deployment,
        Kind::Service,
        Kind::ServiceMonitor,
        Kind::PrometheusRule,
        Kind::RuntimeClass,
        Kind::SecurityContextConstraints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::ServiceAccount => "ServiceAccount",
            Kind::Role => "Role",
            Kind::RoleBinding => "RoleBinding",
            Kind::ClusterRole => "ClusterRole",
            Kind::ClusterRoleBinding => "ClusterRoleBinding",
            Kind::ConfigMap => "ConfigMap",
            Kind::DaemonSet => "DaemonSet",
            Kind::Deployment => "Deployment",
            Kind::Service => "Service",
            Kind::ServiceMonitor => "ServiceMonitor",
            Kind::PrometheusRule => "PrometheusRule",
            Kind::RuntimeClass => "RuntimeClass",
            Kind::SecurityContextConstraints => "SecurityContextConstraints",
        }
    }

    /// Looks up a manifest `kind` field.
    pub fn from_kind(kind: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Kinds a state may hold several of, handled by one control
    pub fn is_batched(self) -> bool {
        matches!(self, Kind::ConfigMap | Kind::RuntimeClass)
    }

    /// Namespaced kinds are placed in the operator namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            Kind::ClusterRole | Kind::ClusterRoleBinding | Kind::RuntimeClass | Kind::SecurityContextConstraints
        )
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Objects of one state, one slot per kind
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub service_account: Option<ServiceAccount>,
    pub role: Option<Role>,
    pub role_binding: Option<RoleBinding>,
    pub cluster_role: Option<ClusterRole>,
    pub cluster_role_binding: Option<ClusterRoleBinding>,
    pub config_maps: Vec<ConfigMap>,
    pub daemon_set: Option<DaemonSet>,
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    /// monitoring.coreos.com CRDs are not part of k8s-openapi
    pub service_monitor: Option<Value>,
    pub prometheus_rule: Option<Value>,
    pub runtime_classes: Vec<RuntimeClass>,
    /// security.openshift.io/v1
    pub security_context_constraints: Option<Value>,
}

fn decode<T: serde::de::DeserializeOwned>(kind: Kind, doc: Value, origin: &str) -> Result<T, ControllerError> {
    serde_json::from_value(doc).map_err(|e| ControllerError::asset(origin, format!("invalid {}: {}", kind, e)))
}

fn fill<T>(slot: &mut Option<T>, value: T, kind: Kind, origin: &str) -> Result<(), ControllerError> {
    if slot.is_some() {
        return Err(ControllerError::asset(
            origin,
            format!("second {} in the same state", kind),
        ));
    }
    *slot = Some(value);
    Ok(())
}

fn to_values<T: Serialize>(items: &[T]) -> Result<Vec<Value>, ControllerError> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(ControllerError::from))
        .collect()
}

impl Resources {
    /// Decodes `doc` as `kind` into its slot.
    ///
    /// Singular kinds may appear once per state.
    pub fn insert(&mut self, kind: Kind, doc: Value, origin: &str) -> Result<(), ControllerError> {
        match kind {
            Kind::ServiceAccount => fill(&mut self.service_account, decode(kind, doc, origin)?, kind, origin),
            Kind::Role => fill(&mut self.role, decode(kind, doc, origin)?, kind, origin),
            Kind::RoleBinding => fill(&mut self.role_binding, decode(kind, doc, origin)?, kind, origin),
            Kind::ClusterRole => fill(&mut self.cluster_role, decode(kind, doc, origin)?, kind, origin),
            Kind::ClusterRoleBinding => fill(&mut self.cluster_role_binding, decode(kind, doc, origin)?, kind, origin),
            Kind::ConfigMap => {
                self.config_maps.push(decode(kind, doc, origin)?);
                Ok(())
            }
            Kind::DaemonSet => fill(&mut self.daemon_set, decode(kind, doc, origin)?, kind, origin),
            Kind::Deployment => fill(&mut self.deployment, decode(kind, doc, origin)?, kind, origin),
            Kind::Service => fill(&mut self.service, decode(kind, doc, origin)?, kind, origin),
            Kind::ServiceMonitor => fill(&mut self.service_monitor, doc, kind, origin),
            Kind::PrometheusRule => fill(&mut self.prometheus_rule, doc, kind, origin),
            Kind::RuntimeClass => {
                self.runtime_classes.push(decode(kind, doc, origin)?);
                Ok(())
            }
            Kind::SecurityContextConstraints => fill(&mut self.security_context_constraints, doc, kind, origin),
        }
    }

    /// Objects of `kind` as JSON, ready for server-side apply.
    pub fn objects(&self, kind: Kind) -> Result<Vec<Value>, ControllerError> {
        let values = match kind {
            Kind::ServiceAccount => to_values(self.service_account.as_slice())?,
            Kind::Role => to_values(self.role.as_slice())?,
            Kind::RoleBinding => to_values(self.role_binding.as_slice())?,
            Kind::ClusterRole => to_values(self.cluster_role.as_slice())?,
            Kind::ClusterRoleBinding => to_values(self.cluster_role_binding.as_slice())?,
            Kind::ConfigMap => to_values(&self.config_maps)?,
            Kind::DaemonSet => to_values(self.daemon_set.as_slice())?,
            Kind::Deployment => to_values(self.deployment.as_slice())?,
            Kind::Service => to_values(self.service.as_slice())?,
            Kind::ServiceMonitor => self.service_monitor.iter().cloned().collect(),
            Kind::PrometheusRule => self.prometheus_rule.iter().cloned().collect(),
            Kind::RuntimeClass => to_values(&self.runtime_classes)?,
            Kind::SecurityContextConstraints => self.security_context_constraints.iter().cloned().collect(),
        };
        Ok(values)
    }
}

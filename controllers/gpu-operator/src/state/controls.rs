//! Controls: apply or delete the objects of one kind and report readiness

use cluster_client::{ClusterClientTrait, ObjectKey};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::labels::managed;
use crate::manifests::Kind;

/// Result of one control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Ready,
    NotReady,
    Disabled,
}

impl ControlStatus {
    /// Worst of two results; `Disabled` counts as ready.
    pub fn worst(self, other: ControlStatus) -> ControlStatus {
        if self == ControlStatus::NotReady || other == ControlStatus::NotReady {
            ControlStatus::NotReady
        } else if self == ControlStatus::Ready || other == ControlStatus::Ready {
            ControlStatus::Ready
        } else {
            ControlStatus::Disabled
        }
    }

    pub fn is_ready(self) -> bool {
        self != ControlStatus::NotReady
    }
}

/// Where and on whose behalf objects are applied
pub struct ControlContext<'a> {
    pub client: &'a dyn ClusterClientTrait,
    pub namespace: &'a str,
    pub owner: Option<OwnerReference>,
}

fn object_name(object: &Value) -> String {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Sets namespace, management label, owner and binding subjects.
pub fn prepare_object(kind: Kind, object: &mut Value, ctx: &ControlContext) -> Result<(), ControllerError> {
    let name = object_name(object);
    let owner = ctx.owner.as_ref().map(serde_json::to_value).transpose()?;

    let metadata = object
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ControllerError::transform(&name, format!("{} without metadata", kind)))?;
    if kind.is_namespaced() {
        metadata.insert("namespace".into(), Value::from(ctx.namespace));
    }

    let labels = metadata.entry("labels").or_insert_with(|| Value::Object(Map::new()));
    if !labels.is_object() {
        *labels = Value::Object(Map::new());
    }
    if let Some(labels) = labels.as_object_mut() {
        labels.insert(managed::MANAGED_BY.into(), Value::from(managed::MANAGED_BY_VALUE));
    }

    if let Some(owner) = owner {
        metadata.insert("ownerReferences".into(), Value::Array(vec![owner]));
    }

    if matches!(kind, Kind::RoleBinding | Kind::ClusterRoleBinding) {
        let subjects = object.get_mut("subjects").and_then(Value::as_array_mut);
        for subject in subjects.into_iter().flatten() {
            if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                if let Some(subject) = subject.as_object_mut() {
                    subject.insert("namespace".into(), Value::from(ctx.namespace));
                }
            }
        }
    }
    Ok(())
}

/// Rollout is complete on every scheduled node.
pub fn daemonset_ready(ds: &DaemonSet) -> bool {
    let Some(status) = &ds.status else {
        return false;
    };
    let desired = status.desired_number_scheduled;
    if desired == 0 {
        return true;
    }
    status.number_unavailable.unwrap_or(0) == 0
        && status.updated_number_scheduled.unwrap_or(0) >= desired
        && status.number_ready >= desired
}

pub fn deployment_ready(deployment: &Deployment) -> bool {
    let wanted = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= wanted
}

async fn object_ready(kind: Kind, name: &str, ctx: &ControlContext<'_>) -> Result<bool, ControllerError> {
    let ready = match kind {
        Kind::DaemonSet => ctx
            .client
            .get_daemonset(ctx.namespace, name)
            .await?
            .is_some_and(|ds| daemonset_ready(&ds)),
        Kind::Deployment => ctx
            .client
            .get_deployment(ctx.namespace, name)
            .await?
            .is_some_and(|d| deployment_ready(&d)),
        _ => true,
    };
    Ok(ready)
}

/// Applies (or deletes, when disabled) every object of one kind.
pub async fn run_control(
    kind: Kind,
    objects: Vec<Value>,
    enabled: bool,
    ctx: &ControlContext<'_>,
) -> Result<ControlStatus, ControllerError> {
    let mut status = if enabled {
        ControlStatus::Ready
    } else {
        ControlStatus::Disabled
    };

    for mut object in objects {
        prepare_object(kind, &mut object, ctx)?;
        let name = object_name(&object);
        let key = ObjectKey::from_value(&object)
            .ok_or_else(|| ControllerError::transform(&name, format!("{} without apiVersion or name", kind)))?;

        if !enabled {
            ctx.client.delete_object(&key).await?;
            debug!(object = %key, "Deleted disabled object");
            continue;
        }

        ctx.client.apply_object(&object).await?;
        debug!(object = %key, "Applied object");
        if !object_ready(kind, &name, ctx).await? {
            info!(object = %key, "Object not ready");
            status = ControlStatus::NotReady;
        }
    }
    Ok(status)
}

//! Shared CRD building blocks
//!
//! Types reused by both `ClusterPolicy` and `NVIDIADriver`: image triplets,
//! environment variables, tolerations, status conditions and the
//! int-or-percent quantity used by upgrade policies.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::validation::ValidationError;

/// Overall state reported in a custom resource status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum State {
    /// All enabled operands are deployed and ready
    Ready,

    /// At least one operand is applied but not yet ready
    #[default]
    NotReady,

    /// A second ClusterPolicy exists; only the first one is reconciled
    Ignored,

    /// The resource is present but its functionality is switched off
    Disabled,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Ready => "ready",
            State::NotReady => "notReady",
            State::Ignored => "ignored",
            State::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Status condition, shaped like `metav1.Condition`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (`Ready`, `Error`)
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// Machine readable reason
    pub reason: String,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Condition type reporting readiness
pub const CONDITION_READY: &str = "Ready";
/// Condition type reporting a reconcile error
pub const CONDITION_ERROR: &str = "Error";

impl Condition {
    /// Builds a condition stamped with the current time.
    pub fn new(type_: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Inserts or replaces the condition with the same type.
///
/// The transition time of an existing condition is kept when its status does
/// not change, so repeated reconciles do not churn the status.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Builds the `Ready`/`Error` condition pair for a reconcile outcome.
pub fn outcome_conditions(conditions: &mut Vec<Condition>, ready: bool, reason: &str, message: &str) {
    set_condition(conditions, Condition::new(CONDITION_READY, ready, reason, message));
    if ready {
        set_condition(conditions, Condition::new(CONDITION_ERROR, false, reason, ""));
    } else {
        set_condition(conditions, Condition::new(CONDITION_ERROR, true, reason, message));
    }
}

/// Environment variable passed to an operand container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,

    /// Variable value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Compute resources for an operand container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Resource limits (e.g. `memory: 512Mi`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    /// Resource requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Pod toleration applied to operand DaemonSets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Taint key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `Exists` or `Equal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Taint effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Eviction grace for `NoExecute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Repository/image/version triplet plus the container knobs every operand shares
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentImage {
    /// Image registry and path, e.g. `nvcr.io/nvidia`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Tag or `sha256:` digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Names of pull secrets in the operator namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Extra environment for the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Extra arguments for the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Compute resources for the main container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// An operand that can be switched on or off and carries an image
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Deploy this operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Image and container settings
    #[serde(flatten)]
    pub image: ComponentImage,
}

impl ComponentSpec {
    /// Returns the explicit flag or the operand's default.
    pub fn enabled_or(&self, default: bool) -> bool {
        self.enabled.unwrap_or(default)
    }
}

/// Reference to a ConfigMap in the operator namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRef {
    /// ConfigMap name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Default entry to use from the ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Integer or percentage, e.g. `2` or `"25%"`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrPercent {
    /// Absolute count
    Int(i32),
    /// Percentage string (`"25%"`) or a bare integer string
    String(String),
}

impl IntOrPercent {
    /// Scales the value against `total`.
    ///
    /// Percentages are rounded up when `round_up` is set, down otherwise.
    pub fn scaled_value(&self, total: i32, round_up: bool) -> Result<i32, ValidationError> {
        match self {
            IntOrPercent::Int(v) => Ok(*v),
            IntOrPercent::String(s) => {
                let trimmed = s.trim();
                if let Some(pct) = trimmed.strip_suffix('%') {
                    let pct: i64 = pct
                        .trim()
                        .parse()
                        .map_err(|_| ValidationError::InvalidIntOrPercent(s.clone()))?;
                    let product = pct * i64::from(total);
                    let value = if round_up { (product + 99).div_euclid(100) } else { product.div_euclid(100) };
                    i32::try_from(value).map_err(|_| ValidationError::InvalidIntOrPercent(s.clone()))
                } else {
                    trimmed
                        .parse()
                        .map_err(|_| ValidationError::InvalidIntOrPercent(s.clone()))
                }
            }
        }
    }
}

/// True when every selector pair is present in `labels`.
///
/// An empty selector matches everything.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

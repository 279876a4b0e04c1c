//! GPU Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the GPU operator controllers,
//! together with their defaults and cross-field validation.

pub mod cluster_policy;
pub mod common;
pub mod nvidia_driver;
pub mod validation;

pub use cluster_policy::*;
pub use common::*;
pub use nvidia_driver::*;
pub use validation::*;

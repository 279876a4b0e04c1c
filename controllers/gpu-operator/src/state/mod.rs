//! ClusterPolicy state engine and its controls

pub mod controls;
pub mod enablement;
pub mod engine;

pub use controls::ControlStatus;
pub use engine::StateEngine;

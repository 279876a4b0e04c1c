//! Node classification and GPU-state labeling

pub mod classifier;
pub mod label_state;
pub mod runtime;

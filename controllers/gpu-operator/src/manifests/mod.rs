//! Manifest catalog: state directories decoded into typed resource bundles

pub mod catalog;
pub mod resources;

#[cfg(test)]
mod catalog_test;

pub use catalog::{Catalog, StateAssets, StateName};
pub use resources::{Kind, Resources};

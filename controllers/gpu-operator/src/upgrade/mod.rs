//! Rolling driver upgrades

pub mod coordinator;
pub mod stale_labels;
pub mod state_manager;

pub use state_manager::{NodeUpgradeStateManager, UpgradeState, UpgradeStateManager, UpgradeSummary};

//! GPU Operator
//!
//! Deploys and keeps in sync the software stack that makes NVIDIA GPUs
//! usable by Kubernetes workloads:
//! - ClusterPolicy: cluster-wide operand configuration, one active instance
//! - NVIDIADriver: per node pool driver DaemonSets
//! - Driver upgrades: node-by-node cordon, drain, restart and validate

mod config;
mod context;
mod controller;
mod error;
mod labels;
mod manifests;
mod metrics;
mod node;
mod reconciler;
mod state;
mod transforms;
mod upgrade;
mod watcher;

#[cfg(test)]
mod test_utils;

use config::OperatorConfig;
use controller::Controller;
use error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting GPU Operator");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Operand namespace: {}", config.namespace);
    info!("  Assets: {}", config.assets_dir.display());
    info!("  Metrics: {}", config.metrics_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

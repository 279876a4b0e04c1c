//! Kubernetes cluster client for the GPU operator
//!
//! A narrow, mockable view of the API server: nodes, pods, DaemonSets,
//! arbitrary manifests applied server-side, and the operator's own custom
//! resources.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let gpu_nodes = client.list_nodes(Some("nvidia.com/gpu.present=true")).await?;
//! println!("{} GPU nodes", gpu_nodes.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod error;
pub mod models;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{KubeClusterClient, FIELD_MANAGER};
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
pub use models::{ObjectKey, Propagation};
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockClusterClient};

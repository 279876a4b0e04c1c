//! Prints the CRD manifests generated from the Rust types.
//!
//! `cargo run -p crds --bin crdgen > deployments/crds.yaml`

use crds::{ClusterPolicy, NVIDIADriver};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&ClusterPolicy::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&NVIDIADriver::crd())?);
    Ok(())
}

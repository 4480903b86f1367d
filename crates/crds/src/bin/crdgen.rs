//! Prints the operator's CRD manifests as a multi-document YAML stream

use crds::{SriovFecClusterConfig, SriovFecNodeConfig, SriovVrbClusterConfig, SriovVrbNodeConfig};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        SriovFecClusterConfig::crd(),
        SriovFecNodeConfig::crd(),
        SriovVrbClusterConfig::crd(),
        SriovVrbNodeConfig::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }

    Ok(())
}

//! Accelerator families
//!
//! FEC and VRB are structurally isomorphic: each has a cluster config, a node
//! config and a bbDevConfig union. [`AcceleratorFamily`] lets the controllers
//! be written once and instantiated per family through the [`Fec`] and [`Vrb`]
//! marker types.

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::bbdev::{BBDevConfigSet, FecBBDevConfig, VrbBBDevConfig};
use crate::error::CrdError;
use crate::inventory::AcceleratorSelector;
use crate::physical_function::{NodeConfigSpec, PhysicalFunctionConfig};
use crate::sriovfec::{SriovFecClusterConfig, SriovFecNodeConfig, SriovFecNodeConfigSpec};
use crate::sriovvrb::{SriovVrbClusterConfig, SriovVrbNodeConfig, SriovVrbNodeConfigSpec};
use crate::status::NodeConfigStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Fec,
    Vrb,
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Fec => "fec",
            Family::Vrb => "vrb",
        }
    }

    pub fn group(self) -> &'static str {
        match self {
            Family::Fec => "sriovfec.intel.com",
            Family::Vrb => "sriovvrb.intel.com",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = CrdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fec" | "sriovfec" => Ok(Family::Fec),
            "vrb" | "sriovvrb" => Ok(Family::Vrb),
            other => Err(CrdError::UnknownFamily(other.to_string())),
        }
    }
}

/// Borrowed, family-independent view of a cluster config spec
#[derive(Debug, Clone, Copy)]
pub struct ClusterConfigView<'a, B> {
    pub priority: i32,
    pub node_selector: &'a BTreeMap<String, String>,
    pub accelerator_selector: Option<&'a AcceleratorSelector>,
    pub physical_function: &'a PhysicalFunctionConfig<B>,
    pub drain_skip: bool,
}

/// Binds a family's CRD types together
pub trait AcceleratorFamily: Send + Sync + 'static {
    const FAMILY: Family;

    type BBDevConfig: BBDevConfigSet
        + Clone
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    type ClusterConfig: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    type NodeConfig: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    fn cluster_config(cc: &Self::ClusterConfig) -> ClusterConfigView<'_, Self::BBDevConfig>;

    fn node_spec(nc: &Self::NodeConfig) -> NodeConfigSpec<Self::BBDevConfig>;

    fn set_node_spec(nc: &mut Self::NodeConfig, spec: NodeConfigSpec<Self::BBDevConfig>);

    fn node_status(nc: &Self::NodeConfig) -> Option<&NodeConfigStatus>;

    /// Empty NodeConfig named after the node
    fn new_node_config(name: &str, namespace: &str) -> Self::NodeConfig;
}

/// sriovfec.intel.com marker
#[derive(Debug, Clone, Copy, Default)]
pub struct Fec;

/// sriovvrb.intel.com marker
#[derive(Debug, Clone, Copy, Default)]
pub struct Vrb;

impl AcceleratorFamily for Fec {
    const FAMILY: Family = Family::Fec;

    type BBDevConfig = FecBBDevConfig;
    type ClusterConfig = SriovFecClusterConfig;
    type NodeConfig = SriovFecNodeConfig;

    fn cluster_config(cc: &Self::ClusterConfig) -> ClusterConfigView<'_, Self::BBDevConfig> {
        ClusterConfigView {
            priority: cc.spec.priority,
            node_selector: &cc.spec.node_selector,
            accelerator_selector: cc.spec.accelerator_selector.as_ref(),
            physical_function: &cc.spec.physical_function,
            drain_skip: cc.spec.drain_skip.unwrap_or(false),
        }
    }

    fn node_spec(nc: &Self::NodeConfig) -> NodeConfigSpec<Self::BBDevConfig> {
        NodeConfigSpec {
            physical_functions: nc.spec.physical_functions.clone(),
            drain_skip: nc.spec.drain_skip,
        }
    }

    fn set_node_spec(nc: &mut Self::NodeConfig, spec: NodeConfigSpec<Self::BBDevConfig>) {
        nc.spec.physical_functions = spec.physical_functions;
        nc.spec.drain_skip = spec.drain_skip;
    }

    fn node_status(nc: &Self::NodeConfig) -> Option<&NodeConfigStatus> {
        nc.status.as_ref()
    }

    fn new_node_config(name: &str, namespace: &str) -> Self::NodeConfig {
        let mut nc = SriovFecNodeConfig::new(name, SriovFecNodeConfigSpec::default());
        nc.metadata.namespace = Some(namespace.to_string());
        nc
    }
}

impl AcceleratorFamily for Vrb {
    const FAMILY: Family = Family::Vrb;

    type BBDevConfig = VrbBBDevConfig;
    type ClusterConfig = SriovVrbClusterConfig;
    type NodeConfig = SriovVrbNodeConfig;

    fn cluster_config(cc: &Self::ClusterConfig) -> ClusterConfigView<'_, Self::BBDevConfig> {
        ClusterConfigView {
            priority: cc.spec.priority,
            node_selector: &cc.spec.node_selector,
            accelerator_selector: cc.spec.accelerator_selector.as_ref(),
            physical_function: &cc.spec.physical_function,
            drain_skip: cc.spec.drain_skip.unwrap_or(false),
        }
    }

    fn node_spec(nc: &Self::NodeConfig) -> NodeConfigSpec<Self::BBDevConfig> {
        NodeConfigSpec {
            physical_functions: nc.spec.physical_functions.clone(),
            drain_skip: nc.spec.drain_skip,
        }
    }

    fn set_node_spec(nc: &mut Self::NodeConfig, spec: NodeConfigSpec<Self::BBDevConfig>) {
        nc.spec.physical_functions = spec.physical_functions;
        nc.spec.drain_skip = spec.drain_skip;
    }

    fn node_status(nc: &Self::NodeConfig) -> Option<&NodeConfigStatus> {
        nc.status.as_ref()
    }

    fn new_node_config(name: &str, namespace: &str) -> Self::NodeConfig {
        let mut nc = SriovVrbNodeConfig::new(name, SriovVrbNodeConfigSpec::default());
        nc.metadata.namespace = Some(namespace.to_string());
        nc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    #[test]
    fn test_family_from_str() {
        assert_eq!("fec".parse::<Family>(), Ok(Family::Fec));
        assert_eq!(" VRB ".parse::<Family>(), Ok(Family::Vrb));
        assert!("acc".parse::<Family>().is_err());
    }

    #[test]
    fn test_new_node_config_is_empty_and_namespaced() {
        let nc = Fec::new_node_config("worker-1", "vran-acceleration-operators");
        assert_eq!(nc.name_any(), "worker-1");
        assert_eq!(nc.namespace().as_deref(), Some("vran-acceleration-operators"));
        assert!(Fec::node_spec(&nc).physical_functions.is_empty());
        assert!(Fec::node_status(&nc).is_none());
    }

    #[test]
    fn test_api_groups() {
        assert_eq!(SriovFecNodeConfig::group(&()), Fec::FAMILY.group());
        assert_eq!(SriovVrbClusterConfig::group(&()), Vrb::FAMILY.group());
        assert_eq!(SriovVrbNodeConfig::version(&()), "v1");
    }
}

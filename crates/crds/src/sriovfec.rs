//! sriovfec.intel.com/v2 CRDs
//!
//! SriovFecClusterConfig is the administrator-facing policy; SriovFecNodeConfig
//! is the per-node desired state written by the operator and reported on by
//! the node daemon.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bbdev::FecBBDevConfig;
use crate::inventory::AcceleratorSelector;
use crate::physical_function::{PhysicalFunctionConfig, PhysicalFunctionConfigExt};
use crate::status::NodeConfigStatus;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sriovfec.intel.com",
    version = "v2",
    kind = "SriovFecClusterConfig",
    shortname = "sfcc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecClusterConfigSpec {
    /// Higher priority wins when several configs select the same accelerator
    #[serde(default)]
    pub priority: i32,

    /// Node labels that must all be present; empty selects every node
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_selector: Option<AcceleratorSelector>,

    pub physical_function: PhysicalFunctionConfig<FecBBDevConfig>,

    /// Skip cordon/drain when applying (required on single-node clusters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_skip: Option<bool>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sriovfec.intel.com",
    version = "v2",
    kind = "SriovFecNodeConfig",
    shortname = "sfnc",
    namespaced,
    status = "NodeConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecNodeConfigSpec {
    #[serde(default)]
    pub physical_functions: Vec<PhysicalFunctionConfigExt<FecBBDevConfig>>,

    #[serde(default)]
    pub drain_skip: bool,
}

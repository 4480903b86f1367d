//! sriovvrb.intel.com/v1 CRDs

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bbdev::VrbBBDevConfig;
use crate::inventory::AcceleratorSelector;
use crate::physical_function::{PhysicalFunctionConfig, PhysicalFunctionConfigExt};
use crate::status::NodeConfigStatus;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sriovvrb.intel.com",
    version = "v1",
    kind = "SriovVrbClusterConfig",
    shortname = "svcc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SriovVrbClusterConfigSpec {
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_selector: Option<AcceleratorSelector>,

    pub physical_function: PhysicalFunctionConfig<VrbBBDevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_skip: Option<bool>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sriovvrb.intel.com",
    version = "v1",
    kind = "SriovVrbNodeConfig",
    shortname = "svnc",
    namespaced,
    status = "NodeConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SriovVrbNodeConfigSpec {
    #[serde(default)]
    pub physical_functions: Vec<PhysicalFunctionConfigExt<VrbBBDevConfig>>,

    #[serde(default)]
    pub drain_skip: bool,
}

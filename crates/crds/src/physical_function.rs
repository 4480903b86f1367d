//! Physical function configuration
//!
//! Generic over the family's bbDevConfig union so the FEC and VRB CRDs share
//! one definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired configuration of one PF, as written in a cluster config
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalFunctionConfig<B> {
    /// Driver bound to the PF (pci-pf-stub, pci_pf_stub, igb_uio or vfio-pci)
    pub pf_driver: String,

    /// Driver bound to each VF
    pub vf_driver: String,

    /// Number of VFs to create
    pub vf_amount: u32,

    #[serde(rename = "bbDevConfig")]
    pub bb_dev_config: B,
}

/// Desired configuration of one PF on a node, keyed by PCI address
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalFunctionConfigExt<B> {
    pub pci_address: String,

    pub pf_driver: String,

    pub vf_driver: String,

    pub vf_amount: u32,

    #[serde(rename = "bbDevConfig")]
    pub bb_dev_config: B,
}

impl<B: Clone> PhysicalFunctionConfigExt<B> {
    pub fn from_template(pci_address: &str, template: &PhysicalFunctionConfig<B>) -> Self {
        Self {
            pci_address: pci_address.to_string(),
            pf_driver: template.pf_driver.clone(),
            vf_driver: template.vf_driver.clone(),
            vf_amount: template.vf_amount,
            bb_dev_config: template.bb_dev_config.clone(),
        }
    }
}

/// Family-independent view of a NodeConfig spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfigSpec<B> {
    pub physical_functions: Vec<PhysicalFunctionConfigExt<B>>,
    pub drain_skip: bool,
}

impl<B> Default for NodeConfigSpec<B> {
    fn default() -> Self {
        Self {
            physical_functions: Vec::new(),
            drain_skip: false,
        }
    }
}

impl<B> NodeConfigSpec<B> {
    pub fn find(&self, pci_address: &str) -> Option<&PhysicalFunctionConfigExt<B>> {
        self.physical_functions
            .iter()
            .find(|pf| pf.pci_address == pci_address)
    }
}

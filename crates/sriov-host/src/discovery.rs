//! Accelerator discovery config
//!
//! JSON table mounted into the daemon describing which PCI devices count as
//! accelerators of a family, e.g.
//!
//! ```json
//! {
//!   "VendorID": {"8086": "Intel Corporation"},
//!   "Class": "12",
//!   "SubClass": "00",
//!   "Devices": {"0d5c": "ACC100", "57c0": "VRB1"},
//!   "NodeLabel": "fpga.intel.com/intel-accelerator-present"
//! }
//! ```

use crds::Family;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::HostError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AcceleratorDiscoveryConfig {
    #[serde(rename = "VendorID")]
    pub vendor_id: BTreeMap<String, String>,

    #[serde(rename = "Class")]
    pub class: String,

    #[serde(rename = "SubClass")]
    pub sub_class: String,

    #[serde(rename = "Devices")]
    pub devices: BTreeMap<String, String>,

    #[serde(rename = "NodeLabel", default)]
    pub node_label: String,
}

impl AcceleratorDiscoveryConfig {
    /// File name under `/sriov_config/config` for a family
    pub fn file_name(family: Family) -> &'static str {
        match family {
            Family::Fec => "accelerators.json",
            Family::Vrb => "accelerators_vrb.json",
        }
    }

    pub fn load(path: &Path) -> Result<Self, HostError> {
        let raw = std::fs::read(path).map_err(|e| HostError::io(path, e))?;
        serde_json::from_slice(&raw).map_err(|source| HostError::Discovery {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether a device with these (normalized) IDs is a known accelerator
    pub fn matches(&self, vendor: &str, class: &str, sub_class: &str, device: &str) -> bool {
        self.vendor_id.contains_key(vendor)
            && self.class == class
            && self.sub_class == sub_class
            && self.devices.contains_key(device)
    }
}

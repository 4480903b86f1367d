//! Node accelerator inventory
//!
//! Observed PCI topology of the accelerators on one node, as reported by the
//! node daemon in `status.inventory`, plus the selector used by cluster configs
//! to pick accelerators out of that inventory.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A virtual function instantiated under an accelerator PF
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFunction {
    /// PCI address of the VF
    pub pci_address: String,

    /// Driver currently bound to the VF (empty when unbound or unknown)
    #[serde(default)]
    pub driver: String,

    /// PCI device ID of the VF (empty when unknown)
    #[serde(default, rename = "deviceID")]
    pub device_id: String,
}

/// An SR-IOV capable accelerator (physical function)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SriovAccelerator {
    #[serde(rename = "vendorID")]
    pub vendor_id: String,

    #[serde(rename = "deviceID")]
    pub device_id: String,

    pub pci_address: String,

    /// Driver currently bound to the PF (empty when unbound)
    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub max_virtual_functions: u32,

    #[serde(default)]
    pub virtual_functions: Vec<VirtualFunction>,
}

impl SriovAccelerator {
    /// Number of VFs currently instantiated under this PF
    pub fn vf_count(&self) -> usize {
        self.virtual_functions.len()
    }
}

/// Accelerators discovered on a node, in discovery order
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeInventory {
    #[serde(default)]
    pub sriov_accelerators: Vec<SriovAccelerator>,
}

impl NodeInventory {
    pub fn find(&self, pci_address: &str) -> Option<&SriovAccelerator> {
        self.sriov_accelerators
            .iter()
            .find(|acc| acc.pci_address == pci_address)
    }
}

/// Per-field filter over the inventory
///
/// Every non-empty field must equal the accelerator's value; empty fields
/// (and a zero `maxVirtualFunctions`) match anything.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorSelector {
    #[serde(default, rename = "vendorID", skip_serializing_if = "String::is_empty")]
    pub vendor_id: String,

    #[serde(default, rename = "deviceID", skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pci_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pf_driver: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_virtual_functions: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl AcceleratorSelector {
    pub fn matches(&self, acc: &SriovAccelerator) -> bool {
        field_matches(&self.vendor_id, &acc.vendor_id)
            && field_matches(&self.device_id, &acc.device_id)
            && field_matches(&self.pci_address, &acc.pci_address)
            && field_matches(&self.pf_driver, &acc.driver)
            && (self.max_virtual_functions == 0
                || self.max_virtual_functions == acc.max_virtual_functions)
    }
}

fn field_matches(selector: &str, value: &str) -> bool {
    selector.is_empty() || selector == value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerator() -> SriovAccelerator {
        SriovAccelerator {
            vendor_id: "8086".to_string(),
            device_id: "0d5c".to_string(),
            pci_address: "0000:14:00.1".to_string(),
            driver: "vfio-pci".to_string(),
            max_virtual_functions: 16,
            virtual_functions: vec![],
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(AcceleratorSelector::default().matches(&accelerator()));
    }

    #[test]
    fn test_selector_requires_every_set_field() {
        let selector = AcceleratorSelector {
            vendor_id: "8086".to_string(),
            device_id: "0d5c".to_string(),
            ..Default::default()
        };
        assert!(selector.matches(&accelerator()));

        let selector = AcceleratorSelector {
            vendor_id: "8086".to_string(),
            device_id: "57c0".to_string(),
            ..Default::default()
        };
        assert!(!selector.matches(&accelerator()));
    }

    #[test]
    fn test_selector_max_vfs() {
        let selector = AcceleratorSelector {
            max_virtual_functions: 8,
            ..Default::default()
        };
        assert!(!selector.matches(&accelerator()));

        let selector = AcceleratorSelector {
            max_virtual_functions: 16,
            pf_driver: "vfio-pci".to_string(),
            ..Default::default()
        };
        assert!(selector.matches(&accelerator()));
    }

    #[test]
    fn test_inventory_serializes_with_uppercase_ids() {
        let json = serde_json::to_value(accelerator()).unwrap();
        assert_eq!(json["vendorID"], "8086");
        assert_eq!(json["deviceID"], "0d5c");
        assert_eq!(json["maxVirtualFunctions"], 16);
    }
}

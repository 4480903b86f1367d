//! Node environment checks
//!
//! A spec that passes admission can still be unusable on a particular node:
//! IOMMU may be off, vfio-pci may be loaded without SR-IOV support, or kernel
//! lockdown may forbid the stub drivers. These checks run before any
//! hardware is touched.

use crds::validation::validate_node_config_spec;
use crds::{BBDevConfigSet, CardModel, NodeConfigSpec, NodeInventory};
use sriov_host::HostPaths;
use sriov_host::kernel::{lockdown_disabled, missing_cmdline_params, module_parameter};

use crate::error::DaemonError;

pub const VFIO_PCI: &str = "vfio-pci";

fn require_module_parameter(
    paths: &HostPaths,
    module: &str,
    param: &str,
    pci: &str,
) -> Result<(), DaemonError> {
    // An unloaded module is loaded with the right parameters during apply
    match module_parameter(paths, module, param)? {
        Some(false) => Err(DaemonError::Validation(format!(
            "{pci}: {module} is loaded without {param}=1, reload the module with {param}=1"
        ))),
        Some(true) | None => Ok(()),
    }
}

/// Check the spec against the node's kernel configuration
pub fn validate_environment<B: BBDevConfigSet>(
    paths: &HostPaths,
    spec: &NodeConfigSpec<B>,
) -> Result<(), DaemonError> {
    validate_node_config_spec(spec).map_err(|e| DaemonError::Validation(e.to_string()))?;

    if spec.physical_functions.is_empty() {
        return Ok(());
    }

    let missing = missing_cmdline_params(paths)?;
    if !missing.is_empty() {
        return Err(DaemonError::Validation(format!(
            "missing kernel parameters: {}",
            missing.join(" ")
        )));
    }

    for pf in &spec.physical_functions {
        let pci = pf.pci_address.as_str();
        match pf.pf_driver.as_str() {
            VFIO_PCI => {
                require_module_parameter(paths, VFIO_PCI, "enable_sriov", pci)?;
                let model = pf.bb_dev_config.card()?.map(|card| card.model());
                if matches!(model, Some(CardModel::Acc100 | CardModel::N3000)) {
                    require_module_parameter(paths, VFIO_PCI, "disable_idle_d3", pci)?;
                }
            }
            "pci-pf-stub" | "pci_pf_stub" | "igb_uio" => {
                if !lockdown_disabled(paths)? {
                    return Err(DaemonError::Validation(format!(
                        "{pci}: pfDriver {} cannot be used while kernel lockdown is enabled",
                        pf.pf_driver
                    )));
                }
            }
            other => {
                return Err(DaemonError::Validation(format!(
                    "{pci}: unknown pfDriver '{other}'"
                )));
            }
        }
    }
    Ok(())
}

/// Every PF in the spec must be present on the node
pub fn validate_against_inventory<B>(
    spec: &NodeConfigSpec<B>,
    inventory: &NodeInventory,
) -> Result<(), DaemonError> {
    let missing: Vec<&str> = spec
        .physical_functions
        .iter()
        .map(|pf| pf.pci_address.as_str())
        .filter(|pci| inventory.find(pci).is_none())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DaemonError::Validation(format!(
            "accelerators not found in node inventory: {}",
            missing.join(", ")
        )))
    }
}

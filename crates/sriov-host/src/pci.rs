//! PCI inventory probe
//!
//! Walks `/sys/bus/pci/devices`, keeps the SR-IOV capable devices matched by
//! the family's discovery config and reports their PF/VF topology.

use crds::{NodeInventory, SriovAccelerator, VirtualFunction};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::discovery::AcceleratorDiscoveryConfig;
use crate::error::HostError;
use crate::paths::HostPaths;

/// Strip the `0x` prefix sysfs puts on IDs and lowercase the rest
fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

fn read_id(dir: &Path, file: &str) -> Option<String> {
    fs::read_to_string(dir.join(file))
        .ok()
        .map(|raw| normalize_id(&raw))
}

/// Name of the driver a device is bound to, empty when unbound
pub fn bound_driver(device_dir: &Path) -> String {
    fs::read_link(device_dir.join("driver"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

/// VF PCI addresses under a PF, ordered by VF index
pub fn virtual_function_addresses(pf_dir: &Path) -> Result<Vec<String>, HostError> {
    let entries = fs::read_dir(pf_dir).map_err(|e| HostError::io(pf_dir, e))?;
    let mut vfs: Vec<(u32, String)> = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = name.strip_prefix("virtfn").and_then(|i| i.parse::<u32>().ok()) else {
            continue;
        };
        match fs::read_link(entry.path()) {
            Ok(target) => {
                if let Some(address) = target.file_name() {
                    vfs.push((index, address.to_string_lossy().into_owned()));
                }
            }
            Err(e) => warn!(link = %entry.path().display(), error = %e, "Unreadable virtfn link"),
        }
    }

    vfs.sort_by_key(|(index, _)| *index);
    Ok(vfs.into_iter().map(|(_, address)| address).collect())
}

fn virtual_function(paths: &HostPaths, address: String) -> VirtualFunction {
    let dir = paths.pci_device(&address);
    VirtualFunction {
        driver: bound_driver(&dir),
        device_id: read_id(&dir, "device").unwrap_or_default(),
        pci_address: address,
    }
}

/// Probe the node for accelerators described by `discovery`
pub fn get_inventory(
    paths: &HostPaths,
    discovery: &AcceleratorDiscoveryConfig,
) -> Result<NodeInventory, HostError> {
    let root = paths.pci_devices();
    let entries = fs::read_dir(&root).map_err(|e| HostError::io(&root, e))?;

    let mut addresses: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    if addresses.is_empty() {
        return Err(HostError::NoPciDevices(root));
    }
    addresses.sort();

    let mut inventory = NodeInventory::default();
    for address in addresses {
        let dir = root.join(&address);

        let (Some(vendor), Some(device), Some(class)) = (
            read_id(&dir, "vendor"),
            read_id(&dir, "device"),
            read_id(&dir, "class"),
        ) else {
            continue;
        };
        let (Some(class_code), Some(sub_class)) = (class.get(0..2), class.get(2..4)) else {
            continue;
        };
        if !discovery.matches(&vendor, class_code, sub_class, &device) {
            continue;
        }

        // Only PFs expose sriov_totalvfs
        let Ok(total_vfs) = fs::read_to_string(dir.join("sriov_totalvfs")) else {
            debug!(pci = %address, "Accelerator is not an SR-IOV PF, skipping");
            continue;
        };
        let max_virtual_functions = total_vfs.trim().parse::<u32>().unwrap_or_default();

        let virtual_functions = virtual_function_addresses(&dir)?
            .into_iter()
            .map(|vf| virtual_function(paths, vf))
            .collect();

        inventory.sriov_accelerators.push(SriovAccelerator {
            vendor_id: vendor,
            device_id: device,
            driver: bound_driver(&dir),
            max_virtual_functions,
            virtual_functions,
            pci_address: address,
        });
    }

    Ok(inventory)
}

//! Admission rules
//!
//! Shared by the operator's validating webhook and by the node daemon, which
//! re-checks a NodeConfig spec before touching hardware. Rules collect every
//! violation instead of stopping at the first one.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::bbdev::{BBDevConfigSet, CardConfig, CardModel};
use crate::error::ValidationError;
use crate::family::{AcceleratorFamily, ClusterConfigView};
use crate::physical_function::{NodeConfigSpec, PhysicalFunctionConfig};

/// Drivers a PF may be bound to
pub const SUPPORTED_PF_DRIVERS: &[&str] = &["pci-pf-stub", "pci_pf_stub", "igb_uio", "vfio-pci"];

/// Queue groups times atomic queues allowed per operation type on VRB2
pub const VRB2_MAX_QUEUES_PER_OPERATION: u64 = 256;

static PF_DRIVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(pci-pf-stub|pci_pf_stub|igb_uio|vfio-pci)$").expect("static regex")
});

static PCI_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-fA-F0-9]{4}:[a-fA-F0-9]{2}:[01][a-fA-F0-9]\.[0-7]$").expect("static regex")
});

pub fn is_valid_pci_address(address: &str) -> bool {
    PCI_ADDRESS_RE.is_match(address)
}

pub fn is_supported_pf_driver(driver: &str) -> bool {
    PF_DRIVER_RE.is_match(driver)
}

/// Rules for one populated bbDevConfig arm
fn validate_card(card: &CardConfig<'_>, vf_amount: u32, errors: &mut ValidationError) {
    let model = card.model();

    if let CardConfig::N3000(n3000) = card {
        let cap = model.queue_cap();
        if n3000.uplink.queues.total() > cap {
            errors.push(format!(
                "uplink: sum of all specified queues must be no more than {cap}"
            ));
        }
        if n3000.downlink.queues.total() > cap {
            errors.push(format!(
                "downlink: sum of all specified queues must be no more than {cap}"
            ));
        }
        return;
    }

    let groups = card.queue_groups();
    let total: u64 = groups
        .iter()
        .map(|(_, group)| u64::from(group.num_queue_groups))
        .sum();
    if total > model.queue_cap() {
        errors.push(format!(
            "{model}: sum of all numQueueGroups should not be greater than {}",
            model.queue_cap()
        ));
    }

    if model == CardModel::Vrb2 {
        for (section, group) in &groups {
            let queues = u64::from(group.num_queue_groups) * u64::from(group.num_aqs_per_groups);
            if queues > VRB2_MAX_QUEUES_PER_OPERATION {
                errors.push(format!(
                    "{section}: numQueueGroups * numAqsPerGroups should not be greater than {VRB2_MAX_QUEUES_PER_OPERATION}"
                ));
            }
        }
    }

    if let Some(bundles) = card.num_vf_bundles()
        && bundles != vf_amount
    {
        errors.push(format!(
            "vfAmount ({vf_amount}) must be equal to numVfBundles ({bundles}) in bbDevConfig"
        ));
    }
}

fn validate_physical_function<B: BBDevConfigSet>(
    pf_driver: &str,
    vf_amount: u32,
    bb_dev_config: &B,
    require_bbdev: bool,
    errors: &mut ValidationError,
) {
    if !is_supported_pf_driver(pf_driver) {
        errors.push(format!(
            "pfDriver '{pf_driver}' is not supported, expected one of: {}",
            SUPPORTED_PF_DRIVERS.join(", ")
        ));
    }

    match bb_dev_config.card() {
        Ok(Some(card)) => validate_card(&card, vf_amount, errors),
        Ok(None) if require_bbdev => errors.push("bbDevConfig section cannot be empty"),
        Ok(None) => {}
        Err(e) => errors.push(e.to_string()),
    }
}

/// Rules applied on cluster config create and update
pub fn validate_cluster_config_spec<B: BBDevConfigSet>(
    view: &ClusterConfigView<'_, B>,
) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let pf: &PhysicalFunctionConfig<B> = view.physical_function;

    validate_physical_function(&pf.pf_driver, pf.vf_amount, &pf.bb_dev_config, true, &mut errors);

    if let Some(selector) = view.accelerator_selector
        && !selector.pci_address.is_empty()
        && !is_valid_pci_address(&selector.pci_address)
    {
        errors.push(format!(
            "acceleratorSelector.pciAddress '{}' is not a valid PCI address",
            selector.pci_address
        ));
    }

    errors.into_result()
}

/// Rules applied on node config create and update, and by the daemon before applying
pub fn validate_node_config_spec<B: BBDevConfigSet>(
    spec: &NodeConfigSpec<B>,
) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let mut seen = HashSet::new();

    for pf in &spec.physical_functions {
        if !is_valid_pci_address(&pf.pci_address) {
            errors.push(format!(
                "physicalFunctions: pciAddress '{}' is not a valid PCI address",
                pf.pci_address
            ));
        }
        if !seen.insert(pf.pci_address.as_str()) {
            errors.push(format!(
                "physicalFunctions: pciAddress '{}' is specified more than once",
                pf.pci_address
            ));
        }
        validate_physical_function(&pf.pf_driver, pf.vf_amount, &pf.bb_dev_config, false, &mut errors);
    }

    errors.into_result()
}

pub fn validate_cluster_config<F: AcceleratorFamily>(
    cc: &F::ClusterConfig,
) -> Result<(), ValidationError> {
    validate_cluster_config_spec(&F::cluster_config(cc))
}

pub fn validate_node_config<F: AcceleratorFamily>(
    nc: &F::NodeConfig,
) -> Result<(), ValidationError> {
    validate_node_config_spec(&F::node_spec(nc))
}

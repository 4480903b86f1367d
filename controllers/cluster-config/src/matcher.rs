//! Cluster config to node config matching.
//!
//! Pure functions: given a node's labels, its last reported inventory and the
//! cluster configs in the namespace, compute the NodeConfig spec the node
//! should carry. At most one cluster config wins per accelerator.

use crds::{AcceleratorFamily, NodeConfigSpec, NodeInventory, PhysicalFunctionConfigExt};
use jiff::Timestamp;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::debug;

/// Insertion-ordered map: `set` appends new keys and replaces existing ones in place
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    keys: Vec<K>,
    values: HashMap<K, V>,
}

impl<K: Clone + Eq + Hash, V> OrderedMap<K, V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    /// Insert or replace, keeping the original position
    pub fn set(&mut self, key: K, value: V) {
        if self.values.insert(key.clone(), value).is_none() {
            self.keys.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.keys
            .iter()
            .filter_map(|key| self.values.get(key).map(|value| (key, value)))
    }
}

impl<K: Clone + Eq + Hash, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn created<K: ResourceExt>(object: &K) -> Option<Timestamp> {
    object.meta().creation_timestamp.as_ref().map(|t| t.0)
}

/// Every selector pair must be present on the node
pub fn node_selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Whether `current` takes an accelerator already assigned to `previous`
fn replaces<F: AcceleratorFamily>(current: &F::ClusterConfig, previous: &F::ClusterConfig) -> bool {
    let current_priority = F::cluster_config(current).priority;
    let previous_priority = F::cluster_config(previous).priority;
    match current_priority.cmp(&previous_priority) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => created(current) > created(previous),
    }
}

/// Assign winning cluster configs to the node's accelerators, in inventory order
pub fn assign<'a, F: AcceleratorFamily>(
    labels: &BTreeMap<String, String>,
    inventory: &NodeInventory,
    cluster_configs: &'a [F::ClusterConfig],
) -> OrderedMap<String, &'a F::ClusterConfig> {
    let mut sorted: Vec<&F::ClusterConfig> = cluster_configs.iter().collect();
    // Name breaks creation-time ties so traversal never depends on list order
    sorted.sort_by(|a, b| {
        created(*a)
            .cmp(&created(*b))
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });

    sorted.retain(|cc| node_selector_matches(F::cluster_config(cc).node_selector, labels));

    // Accelerators outermost so insertion order is inventory order
    let mut assigned: OrderedMap<String, &F::ClusterConfig> = OrderedMap::new();
    for accelerator in &inventory.sriov_accelerators {
        for cc in &sorted {
            let cc: &F::ClusterConfig = cc;
            if !F::cluster_config(cc)
                .accelerator_selector
                .is_none_or(|selector| selector.matches(accelerator))
            {
                continue;
            }

            match assigned.get(&accelerator.pci_address) {
                Some(previous) if !replaces::<F>(cc, previous) => {
                    debug!(
                        "{} keeps {} over {}",
                        accelerator.pci_address,
                        previous.name_any(),
                        cc.name_any()
                    );
                }
                _ => assigned.set(accelerator.pci_address.clone(), cc),
            }
        }
    }
    assigned
}

/// Desired NodeConfig spec for one node
///
/// A node without a reported inventory gets an empty spec. When nothing wins,
/// the current `drainSkip` is kept.
pub fn match_node<F: AcceleratorFamily>(
    labels: &BTreeMap<String, String>,
    inventory: Option<&NodeInventory>,
    cluster_configs: &[F::ClusterConfig],
    current_drain_skip: bool,
) -> NodeConfigSpec<F::BBDevConfig> {
    let Some(inventory) = inventory else {
        return NodeConfigSpec {
            physical_functions: Vec::new(),
            drain_skip: current_drain_skip,
        };
    };

    let assigned = assign::<F>(labels, inventory, cluster_configs);
    if assigned.is_empty() {
        return NodeConfigSpec {
            physical_functions: Vec::new(),
            drain_skip: current_drain_skip,
        };
    }

    let mut drain_skip = false;
    let physical_functions = assigned
        .iter()
        .map(|(pci, cc)| {
            let view = F::cluster_config(cc);
            drain_skip |= view.drain_skip;
            PhysicalFunctionConfigExt::from_template(pci, view.physical_function)
        })
        .collect();

    NodeConfigSpec {
        physical_functions,
        drain_skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        AcceleratorSelector, Fec, FecBBDevConfig, PhysicalFunctionConfig, SriovAccelerator,
        SriovFecClusterConfig, SriovFecClusterConfigSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use proptest::prelude::*;

    fn accelerator(pci: &str, vendor: &str, device: &str) -> SriovAccelerator {
        SriovAccelerator {
            vendor_id: vendor.to_string(),
            device_id: device.to_string(),
            pci_address: pci.to_string(),
            driver: String::new(),
            max_virtual_functions: 16,
            virtual_functions: Vec::new(),
        }
    }

    fn inventory(accelerators: Vec<SriovAccelerator>) -> NodeInventory {
        NodeInventory {
            sriov_accelerators: accelerators,
        }
    }

    fn cluster_config(
        name: &str,
        priority: i32,
        created_secs: i64,
        selector: AcceleratorSelector,
        pf_driver: &str,
        vf_amount: u32,
    ) -> SriovFecClusterConfig {
        let mut cc = SriovFecClusterConfig::new(
            name,
            SriovFecClusterConfigSpec {
                priority,
                node_selector: BTreeMap::new(),
                accelerator_selector: Some(selector),
                physical_function: PhysicalFunctionConfig {
                    pf_driver: pf_driver.to_string(),
                    vf_driver: "vfDriver".to_string(),
                    vf_amount,
                    bb_dev_config: FecBBDevConfig::default(),
                },
                drain_skip: None,
            },
        );
        cc.metadata.creation_timestamp =
            Some(Time(Timestamp::from_second(1_700_000_000 + created_secs).unwrap()));
        cc
    }

    fn no_labels() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_ordered_map_keeps_first_insertion_position() {
        let mut map = OrderedMap::new();
        map.set("b", 1);
        map.set("a", 2);
        map.set("b", 3);
        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(entries, vec![("b", 3), ("a", 2)]);
    }

    #[test]
    fn test_higher_priority_wins() {
        let inv = inventory(vec![accelerator("0000:15:00.1", "testvendor", "id1")]);
        let configs = vec![
            cluster_config(
                "high",
                100,
                0,
                AcceleratorSelector {
                    vendor_id: "testvendor".to_string(),
                    ..Default::default()
                },
                "pci-pf-stub",
                1,
            ),
            cluster_config(
                "low",
                1,
                1,
                AcceleratorSelector {
                    pci_address: "0000:15:00.1".to_string(),
                    ..Default::default()
                },
                "igb_uio",
                2,
            ),
        ];

        let spec = match_node::<Fec>(&no_labels(), Some(&inv), &configs, false);
        assert_eq!(spec.physical_functions.len(), 1);
        let pf = &spec.physical_functions[0];
        assert_eq!(pf.pci_address, "0000:15:00.1");
        assert_eq!(pf.vf_amount, 1);
        assert_eq!(pf.pf_driver, "pci-pf-stub");
        assert_eq!(pf.vf_driver, "vfDriver");
    }

    #[test]
    fn test_equal_priority_newest_wins() {
        let inv = inventory(vec![accelerator("0000:15:00.1", "8086", "0d5c")]);
        let configs = vec![
            cluster_config("config2", 1, 1, AcceleratorSelector::default(), "vfio-pci", 2),
            cluster_config("config1", 1, 0, AcceleratorSelector::default(), "igb_uio", 1),
        ];

        let spec = match_node::<Fec>(&no_labels(), Some(&inv), &configs, false);
        assert_eq!(spec.physical_functions.len(), 1);
        assert_eq!(spec.physical_functions[0].pf_driver, "vfio-pci");
        assert_eq!(spec.physical_functions[0].vf_amount, 2);
    }

    #[test]
    fn test_unmatched_selector_yields_empty_spec() {
        let configs = vec![cluster_config(
            "config",
            1,
            0,
            AcceleratorSelector {
                vendor_id: "notExistingVendor".to_string(),
                ..Default::default()
            },
            "igb_uio",
            1,
        )];

        for node in ["n1", "n2"] {
            let inv = inventory(vec![accelerator("0000:15:00.1", "8086", node)]);
            let spec = match_node::<Fec>(&no_labels(), Some(&inv), &configs, false);
            assert!(spec.physical_functions.is_empty());
        }
    }

    #[test]
    fn test_two_configs_two_accelerators_in_inventory_order() {
        let inv = inventory(vec![
            accelerator("0000:14:00.1", "8086", "id1"),
            accelerator("0000:15:00.1", "8086", "id2"),
        ]);
        // cc2 is older, output still follows inventory order
        let configs = vec![
            cluster_config(
                "cc1",
                1,
                5,
                AcceleratorSelector {
                    device_id: "id1".to_string(),
                    ..Default::default()
                },
                "igb_uio",
                1,
            ),
            cluster_config(
                "cc2",
                1,
                0,
                AcceleratorSelector {
                    device_id: "id2".to_string(),
                    ..Default::default()
                },
                "vfio-pci",
                2,
            ),
        ];

        let spec = match_node::<Fec>(&no_labels(), Some(&inv), &configs, false);
        let addresses: Vec<_> = spec
            .physical_functions
            .iter()
            .map(|pf| pf.pci_address.as_str())
            .collect();
        assert_eq!(addresses, vec!["0000:14:00.1", "0000:15:00.1"]);
        assert_eq!(spec.find("0000:14:00.1").unwrap().pf_driver, "igb_uio");
        assert_eq!(spec.find("0000:15:00.1").unwrap().pf_driver, "vfio-pci");
    }

    #[test]
    fn test_node_selector_must_match_all_pairs() {
        let inv = inventory(vec![accelerator("0000:15:00.1", "8086", "0d5c")]);
        let mut cc = cluster_config("cc", 1, 0, AcceleratorSelector::default(), "igb_uio", 1);
        cc.spec.node_selector = BTreeMap::from([
            ("zone".to_string(), "a".to_string()),
            ("role".to_string(), "du".to_string()),
        ]);
        let configs = vec![cc];

        let partial = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        assert!(match_node::<Fec>(&partial, Some(&inv), &configs, false)
            .physical_functions
            .is_empty());

        let full = BTreeMap::from([
            ("zone".to_string(), "a".to_string()),
            ("role".to_string(), "du".to_string()),
            ("extra".to_string(), "x".to_string()),
        ]);
        assert_eq!(
            match_node::<Fec>(&full, Some(&inv), &configs, false)
                .physical_functions
                .len(),
            1
        );
    }

    #[test]
    fn test_drain_skip() {
        let inv = inventory(vec![accelerator("0000:15:00.1", "8086", "0d5c")]);

        // No inventory and no winners keep the current value
        assert!(match_node::<Fec>(&no_labels(), None, &[], true).drain_skip);
        assert!(match_node::<Fec>(&no_labels(), Some(&inv), &[], true).drain_skip);

        let mut cc = cluster_config("cc", 1, 0, AcceleratorSelector::default(), "igb_uio", 1);
        cc.spec.drain_skip = Some(true);
        let spec = match_node::<Fec>(&no_labels(), Some(&inv), &[cc.clone()], false);
        assert!(spec.drain_skip);

        cc.spec.drain_skip = None;
        let spec = match_node::<Fec>(&no_labels(), Some(&inv), &[cc], true);
        assert!(!spec.drain_skip);
    }

    proptest! {
        #[test]
        fn prop_winner_is_independent_of_list_order(
            priorities in prop::collection::vec(0i32..3, 1..6),
            rotate in 0usize..6,
        ) {
            let inv = inventory(vec![accelerator("0000:15:00.1", "8086", "0d5c")]);
            let configs: Vec<_> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let mut cc = cluster_config(
                        &format!("cc{i}"), *p, i as i64, AcceleratorSelector::default(), "igb_uio", 1,
                    );
                    cc.spec.physical_function.vf_amount = i as u32;
                    cc
                })
                .collect();
            let mut rotated = configs.clone();
            rotated.rotate_left(rotate % configs.len());

            let a = match_node::<Fec>(&no_labels(), Some(&inv), &configs, false);
            let b = match_node::<Fec>(&no_labels(), Some(&inv), &rotated, false);
            prop_assert_eq!(&a, &b);

            // Highest priority, newest among equals
            let max = *priorities.iter().max().unwrap();
            let expected = priorities.iter().rposition(|p| *p == max).unwrap() as u32;
            prop_assert_eq!(a.physical_functions[0].vf_amount, expected);
        }
    }
}

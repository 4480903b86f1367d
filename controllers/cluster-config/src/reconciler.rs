//! Reconciliation logic for cluster configs.
//!
//! One pass lists the accelerator nodes and the family's cluster configs,
//! computes each node's desired NodeConfig spec with the matcher and writes
//! it back when it differs.

use crate::error::ControllerError;
use crate::matcher::match_node;
use crds::{
    AcceleratorFamily, CONFIGURATION_PROPAGATION_CONDITION, Condition, ConditionReason,
    ConditionStatus,
};
use k8s_openapi::api::core::v1::Node;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use operator_common::{Requeue, is_not_found, retry_on_conflict};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Label set on nodes carrying at least one accelerator
pub const ACCELERATOR_PRESENT_LABEL: &str = "fpga.intel.com/intel-accelerator-present";

/// Requeue interval while any cluster config exists, to pick up inventory drift
pub const INVENTORY_REQUEUE: Duration = Duration::from_secs(60);

/// Distributes one family's cluster configs to node configs.
pub struct Reconciler<F: AcceleratorFamily> {
    node_api: Api<Node>,
    cluster_config_api: Api<F::ClusterConfig>,
    node_config_api: Api<F::NodeConfig>,
    _family: PhantomData<F>,
}

impl<F: AcceleratorFamily> Reconciler<F> {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            node_api: Api::all(client.clone()),
            cluster_config_api: Api::namespaced(client.clone(), namespace),
            node_config_api: Api::namespaced(client, namespace),
            _family: PhantomData,
        }
    }

    /// Runs one matching pass over all accelerator nodes.
    ///
    /// A node whose NodeConfig cannot be read or written is logged and
    /// skipped; only listing failures abort the pass.
    pub async fn reconcile(&self) -> Result<Requeue, ControllerError> {
        let family = F::FAMILY;
        let nodes = self
            .node_api
            .list(&ListParams::default().labels(ACCELERATOR_PRESENT_LABEL))
            .await?;
        let cluster_configs = self
            .cluster_config_api
            .list(&ListParams::default())
            .await?
            .items;

        info!(
            "Matching {} {} cluster configs against {} nodes",
            cluster_configs.len(),
            family,
            nodes.items.len()
        );

        for node in &nodes.items {
            let name = node.name_any();
            if let Err(e) = self.reconcile_node(node, &cluster_configs).await {
                error!(node = %name, %family, "Failed to propagate configuration: {}", e);
            }
        }

        if cluster_configs.is_empty() {
            Ok(Requeue::Resync)
        } else {
            Ok(Requeue::After(INVENTORY_REQUEUE))
        }
    }

    async fn reconcile_node(
        &self,
        node: &Node,
        cluster_configs: &[F::ClusterConfig],
    ) -> Result<(), ControllerError> {
        let name = node.name_any();
        let node_config = match self.node_config_api.get(&name).await {
            Ok(nc) => nc,
            Err(e) if is_not_found(&e) => {
                // Created by the node daemon on its first pass
                debug!(node = %name, "NodeConfig not created yet, skipping");
                return Ok(());
            }
            Err(e) => {
                warn!(node = %name, "Failed to get NodeConfig: {}", e);
                return Ok(());
            }
        };

        let current = F::node_spec(&node_config);
        let desired = match_node::<F>(
            node.labels(),
            F::node_status(&node_config).map(|status| &status.inventory),
            cluster_configs,
            current.drain_skip,
        );

        if desired == current {
            debug!(node = %name, "NodeConfig spec up to date");
            return Ok(());
        }

        info!(
            node = %name,
            physical_functions = desired.physical_functions.len(),
            "Updating NodeConfig spec"
        );
        let result = retry_on_conflict("NodeConfig update", || {
            let api = self.node_config_api.clone();
            let name = name.clone();
            let desired = desired.clone();
            async move {
                let mut latest = api.get(&name).await?;
                F::set_node_spec(&mut latest, desired);
                api.replace(&name, &PostParams::default(), &latest).await
            }
        })
        .await;

        if let Err(e) = result {
            self.mark_propagation_failed(&name, &e.to_string()).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Records `ConfigurationPropagation=False` on the NodeConfig status.
    async fn mark_propagation_failed(&self, name: &str, message: &str) {
        let result = retry_on_conflict("NodeConfig status update", || {
            let api = self.node_config_api.clone();
            async move {
                let latest = api.get(name).await?;
                let mut status = F::node_status(&latest).cloned().unwrap_or_default();
                status.set_condition(Condition::new(
                    CONFIGURATION_PROPAGATION_CONDITION,
                    ConditionStatus::False,
                    ConditionReason::Failed,
                    message,
                    latest.meta().generation,
                ));
                let patch = serde_json::json!({
                    "metadata": { "resourceVersion": latest.resource_version() },
                    "status": { "conditions": status.conditions },
                });
                api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
            }
        })
        .await;

        if let Err(e) = result {
            error!(node = %name, "Failed to update NodeConfig error status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        AcceleratorSelector, Fec, FecBBDevConfig, NodeConfigStatus, NodeInventory,
        PhysicalFunctionConfig, SriovAccelerator, SriovFecClusterConfig, SriovFecClusterConfigSpec,
        SriovFecNodeConfig,
    };
    use jiff::Timestamp;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use operator_common::testing::{FakeApiServer, Method};
    use serde_json::Value;
    use std::collections::BTreeMap;

    const PF: &str = "0000:14:00.1";
    const NODE_CONFIGS: &str = "/apis/sriovfec.intel.com/v2/namespaces/vran/sriovfecnodeconfigs";
    const CLUSTER_CONFIGS: &str = "/apis/sriovfec.intel.com/v2/namespaces/vran/sriovfecclusterconfigs";

    fn node(name: &str) -> Value {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    ACCELERATOR_PRESENT_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        serde_json::to_value(&node).unwrap()
    }

    fn node_config(name: &str) -> Value {
        let mut nc = Fec::new_node_config(name, "vran");
        nc.metadata.generation = Some(3);
        nc.status = Some(NodeConfigStatus {
            inventory: NodeInventory {
                sriov_accelerators: vec![SriovAccelerator {
                    vendor_id: "8086".to_string(),
                    device_id: "0d5c".to_string(),
                    pci_address: PF.to_string(),
                    driver: "pci-pf-stub".to_string(),
                    max_virtual_functions: 16,
                    virtual_functions: Vec::new(),
                }],
            },
            ..Default::default()
        });
        serde_json::to_value(&nc).unwrap()
    }

    fn cluster_config(name: &str) -> Value {
        let mut cc = SriovFecClusterConfig::new(
            name,
            SriovFecClusterConfigSpec {
                priority: 1,
                node_selector: BTreeMap::new(),
                accelerator_selector: Some(AcceleratorSelector {
                    device_id: "0d5c".to_string(),
                    ..Default::default()
                }),
                physical_function: PhysicalFunctionConfig {
                    pf_driver: "pci-pf-stub".to_string(),
                    vf_driver: "vfio-pci".to_string(),
                    vf_amount: 2,
                    bb_dev_config: FecBBDevConfig::default(),
                },
                drain_skip: None,
            },
        );
        cc.metadata.namespace = Some("vran".to_string());
        cc.metadata.creation_timestamp = Some(Time(Timestamp::from_second(1_700_000_000).unwrap()));
        serde_json::to_value(&cc).unwrap()
    }

    fn node_config_path(name: &str) -> String {
        format!("{NODE_CONFIGS}/{name}")
    }

    fn server_with_nodes(names: &[&str]) -> FakeApiServer {
        let server = FakeApiServer::new();
        for name in names {
            server.insert(&format!("/api/v1/nodes/{name}"), node(name));
        }
        server
    }

    fn stored_spec(server: &FakeApiServer, name: &str) -> crds::NodeConfigSpec<FecBBDevConfig> {
        let nc: SriovFecNodeConfig =
            serde_json::from_value(server.object(&node_config_path(name)).unwrap()).unwrap();
        Fec::node_spec(&nc)
    }

    #[tokio::test]
    async fn test_spec_written_and_missing_node_config_skipped() {
        let server = server_with_nodes(&["worker-1", "worker-2"]);
        server.insert(&node_config_path("worker-1"), node_config("worker-1"));
        server.insert(&format!("{CLUSTER_CONFIGS}/config"), cluster_config("config"));
        let reconciler = Reconciler::<Fec>::new(server.client(), "vran");

        let requeue = reconciler.reconcile().await.unwrap();
        assert_eq!(requeue, Requeue::After(INVENTORY_REQUEUE));

        let spec = stored_spec(&server, "worker-1");
        assert_eq!(spec.physical_functions.len(), 1);
        assert_eq!(spec.physical_functions[0].pci_address, PF);
        assert_eq!(spec.physical_functions[0].vf_amount, 2);
        assert_eq!(server.requests_to(&Method::PUT, &node_config_path("worker-1")).len(), 1);

        // worker-2 has no NodeConfig yet; the pass goes on without creating one
        assert_eq!(server.requests_to(&Method::GET, &node_config_path("worker-2")).len(), 1);
        assert!(server.requests_to(&Method::PUT, &node_config_path("worker-2")).is_empty());
        assert!(server.requests_to(&Method::POST, NODE_CONFIGS).is_empty());
        assert!(server.object(&node_config_path("worker-2")).is_none());
    }

    #[tokio::test]
    async fn test_matching_spec_is_not_rewritten() {
        let server = server_with_nodes(&["worker-1"]);
        server.insert(&node_config_path("worker-1"), node_config("worker-1"));
        server.insert(&format!("{CLUSTER_CONFIGS}/config"), cluster_config("config"));
        let reconciler = Reconciler::<Fec>::new(server.client(), "vran");

        reconciler.reconcile().await.unwrap();
        reconciler.reconcile().await.unwrap();

        assert_eq!(server.requests_to(&Method::PUT, &node_config_path("worker-1")).len(), 1);
    }

    #[tokio::test]
    async fn test_no_cluster_configs_waits_for_resync() {
        let server = server_with_nodes(&["worker-1"]);
        server.insert(&node_config_path("worker-1"), node_config("worker-1"));
        let reconciler = Reconciler::<Fec>::new(server.client(), "vran");

        assert_eq!(reconciler.reconcile().await.unwrap(), Requeue::Resync);
        assert!(server.requests_to(&Method::PUT, &node_config_path("worker-1")).is_empty());
    }

    #[tokio::test]
    async fn test_lasting_conflict_marks_propagation_failed() {
        let server = server_with_nodes(&["worker-1"]);
        server.insert(&node_config_path("worker-1"), node_config("worker-1"));
        server.insert(&format!("{CLUSTER_CONFIGS}/config"), cluster_config("config"));
        server.fail(Method::PUT, &node_config_path("worker-1"), 409);
        let reconciler = Reconciler::<Fec>::new(server.client(), "vran");

        // One node failing does not fail the pass
        let requeue = reconciler.reconcile().await.unwrap();
        assert_eq!(requeue, Requeue::After(INVENTORY_REQUEUE));

        assert_eq!(server.requests_to(&Method::PUT, &node_config_path("worker-1")).len(), 5);
        let status_path = format!("{}/status", node_config_path("worker-1"));
        assert_eq!(server.requests_to(&Method::PATCH, &status_path).len(), 1);

        let nc: SriovFecNodeConfig =
            serde_json::from_value(server.object(&node_config_path("worker-1")).unwrap()).unwrap();
        let status = Fec::node_status(&nc).unwrap();
        let condition = status.condition(CONFIGURATION_PROPAGATION_CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, ConditionReason::Failed.as_str());
        assert_eq!(condition.observed_generation, Some(3));

        // Inventory reported by the daemon is kept
        assert_eq!(status.inventory.sriov_accelerators.len(), 1);
        assert!(stored_spec(&server, "worker-1").physical_functions.is_empty());
    }
}
